//! The shared registry model
//!
//! One lock guards everything the APIs and workers touch together: the
//! resource store (which includes subscription records), the attached
//! WebSocket sessions with their pending change buffers, the queue of
//! events awaiting fanout, and the live settings.
//!
//! Two `Notify` values play the role of condition variables associated with
//! the lock: `expiration` wakes the GC worker when new health information
//! arrives, `events` wakes the fanout worker when resource events are
//! queued. Both are signaled after mutations, without any I/O under the
//! lock.

use crate::events::{Change, ResourceEvent};
use crate::query::ResourceQuery;
use crate::store::Resources;
use rnmos_core::{make_id, Settings, Tai};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

/// A change waiting in a session's buffer, with the stamp that ordered it
#[derive(Debug, Clone)]
pub struct PendingChange {
    pub change: Change,
    pub updated: Tai,
}

/// One WebSocket session attached to a subscription
///
/// The subscription's filter-defining fields are captured at attach time;
/// subscription records are immutable after creation.
pub struct WsSession {
    pub subscription_id: String,
    pub resource_path: String,
    pub filter: ResourceQuery,
    pub max_update_rate: Duration,
    pub persist: bool,
    /// Outgoing messages; the socket writer drains this channel so grain
    /// assembly never blocks on a slow client
    pub tx: mpsc::UnboundedSender<Message>,
    pub pending: Vec<PendingChange>,
    pub last_send: Option<Instant>,
    pub sent_grains: u64,
}

impl WsSession {
    /// Whether an event topic falls under this subscription's resource path
    pub fn matches_topic(&self, topic: &str) -> bool {
        self.resource_path.is_empty() || self.resource_path == "/" || self.resource_path == topic
    }
}

/// Everything guarded by the store lock
pub struct Model {
    pub resources: Resources,
    pub sessions: HashMap<u64, WsSession>,
    next_session: u64,
    /// Events queued for the fanout worker, in updated order
    pub pending_events: Vec<ResourceEvent>,
    pub settings: Settings,
    /// Identifies this Query API instance in grain `source_id`
    pub source_id: String,
    /// The registry's own node, served by the Node API
    pub self_node_id: String,
}

impl Model {
    pub fn new(settings: Settings) -> Self {
        Self {
            resources: Resources::new(),
            sessions: HashMap::new(),
            next_session: 0,
            pending_events: Vec::new(),
            settings,
            source_id: make_id(),
            self_node_id: String::new(),
        }
    }

    /// Attach a session, returning its id
    pub fn insert_session(&mut self, session: WsSession) -> u64 {
        let id = self.next_session;
        self.next_session += 1;
        self.sessions.insert(id, session);
        id
    }

    pub fn remove_session(&mut self, id: u64) -> Option<WsSession> {
        self.sessions.remove(&id)
    }

    /// How many sessions are attached to a subscription
    pub fn sessions_for(&self, subscription_id: &str) -> usize {
        self.sessions
            .values()
            .filter(|s| s.subscription_id == subscription_id)
            .count()
    }

    pub fn push_events(&mut self, events: impl IntoIterator<Item = ResourceEvent>) {
        self.pending_events.extend(events);
    }
}

/// The model plus its two condition variables
pub struct RegistryModel {
    pub model: Mutex<Model>,
    /// Signaled when new health information arrives
    pub expiration: Notify,
    /// Signaled when resource events are queued for subscribers
    pub events: Notify,
}

impl RegistryModel {
    pub fn new(settings: Settings) -> Arc<Self> {
        Arc::new(Self {
            model: Mutex::new(Model::new(settings)),
            expiration: Notify::new(),
            events: Notify::new(),
        })
    }
}
