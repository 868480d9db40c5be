//! Resource change events and grain assembly
//!
//! Every mutation of the store produces a [`ResourceEvent`] carrying the
//! payload before and after the change. The fanout worker turns events into
//! per-subscription [`Change`] records via the filter truth table and
//! batches them into `grain` messages.
//!
//! The truth table, for a subscription filter `m`:
//!
//! | m(pre) | m(post) | record            |
//! |--------|---------|-------------------|
//! | false  | true    | addition (`post`) |
//! | true   | false   | deletion (`pre`)  |
//! | true   | true    | modification when `pre != post`, else nothing |
//! | false  | false   | nothing           |

use rnmos_core::{ResourceType, Tai};
use serde::Serialize;
use serde_json::{json, Value};

/// A store mutation, as seen by subscribers
#[derive(Debug, Clone)]
pub struct ResourceEvent {
    pub type_: ResourceType,
    pub id: String,
    /// Payload before the change; absent for additions
    pub pre: Option<Value>,
    /// Payload after the change; absent for deletions
    pub post: Option<Value>,
    /// The `updated` stamp of the mutation
    pub updated: Tai,
}

impl ResourceEvent {
    pub fn added(type_: ResourceType, id: &str, post: Value, updated: Tai) -> Self {
        Self {
            type_,
            id: id.to_string(),
            pre: None,
            post: Some(post),
            updated,
        }
    }

    pub fn modified(type_: ResourceType, id: &str, pre: Value, post: Value, updated: Tai) -> Self {
        Self {
            type_,
            id: id.to_string(),
            pre: Some(pre),
            post: Some(post),
            updated,
        }
    }

    pub fn removed(type_: ResourceType, id: &str, pre: Value, updated: Tai) -> Self {
        Self {
            type_,
            id: id.to_string(),
            pre: Some(pre),
            post: None,
            updated,
        }
    }

    /// The subscription topic this event belongs to, e.g. `/nodes`
    pub fn topic(&self) -> String {
        format!("/{}", self.type_.path_segment())
    }
}

/// Deletion events for a batch of erased resources
///
/// The erased resources' own stamps are history; a deletion is a new state
/// transition, so each gets a fresh stamp from `base` onwards, keeping the
/// batch ordered and distinct.
pub fn removal_events(removed: &[rnmos_core::Resource], base: Tai) -> Vec<ResourceEvent> {
    let mut stamp = base;
    removed
        .iter()
        .map(|r| {
            let event = ResourceEvent::removed(r.type_, &r.id, r.data.clone(), stamp);
            stamp = stamp.successor();
            event
        })
        .collect()
}

/// One entry in a grain's `data` array
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    /// The resource id
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<Value>,
}

/// Apply a subscription filter to an event per the truth table
pub fn filter_event(
    matches: impl Fn(&Value) -> bool,
    event: &ResourceEvent,
) -> Option<Change> {
    let match_pre = event.pre.as_ref().map(&matches).unwrap_or(false);
    let match_post = event.post.as_ref().map(&matches).unwrap_or(false);
    match (match_pre, match_post) {
        (false, true) => Some(Change {
            path: event.id.clone(),
            pre: None,
            post: event.post.clone(),
        }),
        (true, false) => Some(Change {
            path: event.id.clone(),
            pre: event.pre.clone(),
            post: None,
        }),
        (true, true) if event.pre != event.post => Some(Change {
            path: event.id.clone(),
            pre: event.pre.clone(),
            post: event.post.clone(),
        }),
        _ => None,
    }
}

/// Assemble a grain message from a batch of changes
///
/// `source_id` identifies this Query API instance, `flow_id` the
/// subscription. The topic always carries a trailing slash.
pub fn make_grain(
    source_id: &str,
    flow_id: &str,
    topic: &str,
    changes: &[Change],
    origin: Tai,
    sync: Tai,
    creation: Tai,
) -> Value {
    let topic = if topic.ends_with('/') {
        topic.to_string()
    } else {
        format!("{}/", topic)
    };
    json!({
        "grain_type": "event",
        "source_id": source_id,
        "flow_id": flow_id,
        "origin_timestamp": origin.to_string(),
        "sync_timestamp": sync.to_string(),
        "creation_timestamp": creation.to_string(),
        "rate": {"numerator": 0, "denominator": 1},
        "duration": {"numerator": 0, "denominator": 1},
        "grain": {
            "type": "urn:x-nmos:format:data.event",
            "topic": topic,
            "data": serde_json::to_value(changes).unwrap_or_else(|_| json!([])),
        }
    })
}
