//! Subscription event fanout
//!
//! A single long-lived task turns queued resource events into grains. On
//! each wake it drains the model's event queue into the per-session pending
//! buffers (applying each subscription's filter via the truth table), then
//! assembles a grain for every session whose rate limit allows a send.
//! Grain messages are copied out of the lock and written through each
//! session's channel, so no socket I/O happens under the model lock.
//!
//! Within one subscription, change records stay in `updated` order: events
//! are queued in mutation order and buffers are appended in that order, so
//! concatenating grain payloads reproduces the state transitions of the
//! matching set.

use crate::events::{filter_event, make_grain, Change};
use crate::model::{Model, PendingChange, RegistryModel};
use rnmos_core::Tai;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

type Outgoing = Vec<(mpsc::UnboundedSender<Message>, Message)>;

/// Run the fanout loop until shutdown
pub async fn send_query_ws_events(
    model: Arc<RegistryModel>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("Starting query WebSocket events task");
    loop {
        let (outgoing, next_due) = {
            let mut locked = model.model.lock().await;
            distribute_events(&mut locked);
            collect_due_grains(&mut locked)
        };

        for (tx, message) in outgoing {
            // a closed channel means the session is going away; cleanup
            // happens on the connection task
            let _ = tx.send(message);
        }

        let wake_after = next_due.unwrap_or(Duration::from_secs(1));
        tokio::select! {
            _ = model.events.notified() => {}
            _ = tokio::time::sleep(wake_after) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Query WebSocket events task shutting down");
                    break;
                }
            }
        }
    }
}

/// Move queued events into the pending buffer of every matching session
fn distribute_events(model: &mut Model) {
    let events = std::mem::take(&mut model.pending_events);
    for event in &events {
        let topic = event.topic();
        for session in model.sessions.values_mut() {
            if !session.matches_topic(&topic) {
                continue;
            }
            if let Some(change) = filter_event(|data| session.filter.matches(data), event) {
                session.pending.push(PendingChange {
                    change,
                    updated: event.updated,
                });
            }
        }
    }
}

/// Assemble grains for sessions whose rate limit has elapsed
///
/// Returns the messages to send and the shortest remaining interval among
/// sessions that still owe a grain.
fn collect_due_grains(model: &mut Model) -> (Outgoing, Option<Duration>) {
    let now = Instant::now();
    let mut outgoing = Vec::new();
    let mut next_due: Option<Duration> = None;
    let source_id = model.source_id.clone();

    for session in model.sessions.values_mut() {
        if session.pending.is_empty() {
            continue;
        }
        let elapsed = session.last_send.map(|at| now.duration_since(at));
        let due = elapsed
            .map(|e| e >= session.max_update_rate)
            .unwrap_or(true);
        if !due {
            let remaining = session.max_update_rate - elapsed.unwrap_or_default();
            next_due = Some(next_due.map_or(remaining, |d| d.min(remaining)));
            continue;
        }

        let pending = std::mem::take(&mut session.pending);
        // the batch's origin/sync stamp is the latest included change
        let origin = pending.last().map(|p| p.updated).unwrap_or_default();
        let changes: Vec<Change> = pending.into_iter().map(|p| p.change).collect();
        let grain = make_grain(
            &source_id,
            &session.subscription_id,
            &session.resource_path,
            &changes,
            origin,
            origin,
            Tai::now(),
        );
        session.last_send = Some(now);
        session.sent_grains += 1;
        outgoing.push((session.tx.clone(), Message::Text(grain.to_string())));
    }

    (outgoing, next_due)
}
