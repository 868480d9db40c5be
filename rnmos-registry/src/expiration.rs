//! Registration expiry
//!
//! A single long-lived task reclaims resources whose health has not been
//! refreshed within the garbage-collection window. Each pass computes
//! `cutoff = now - registration_expiry_interval`, erases everything staler
//! (cascading through descendants), queues synthetic deletion events for
//! the fanout worker, and then sleeps until the next resource could expire
//! — bounded by one second — or until a heartbeat arrives on the
//! expiration condition.
//!
//! Errors never abort the task; the next tick retries.

use crate::events::removal_events;
use crate::model::RegistryModel;
use rnmos_core::health_now;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Run the expiry loop until shutdown
pub async fn erase_expired_resources(
    model: Arc<RegistryModel>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("Starting registration expiry task");
    loop {
        let (expired, wake_after) = {
            let mut locked = model.model.lock().await;
            let interval = locked.settings.registration_expiry_interval;
            let cutoff = health_now().saturating_sub(interval);

            let removed = locked.resources.erase_expired(cutoff);
            let expired = removed.len();
            if expired > 0 {
                tracing::info!(count = expired, cutoff = cutoff, "Expired stale registrations");
                let base = locked.resources.strictly_increasing_update();
                let events = removal_events(&removed, base);
                locked.push_events(events);
            }

            // sleep until the earliest possible expiry, at most 1s
            let wake_after = match locked.resources.next_expiry() {
                Some(health) => {
                    let due = health + interval;
                    let remaining = due.saturating_sub(health_now());
                    if remaining == 0 {
                        // at the boundary; re-check shortly
                        Duration::from_millis(200)
                    } else {
                        Duration::from_secs(remaining.min(1))
                    }
                }
                None => Duration::from_secs(1),
            };
            (expired, wake_after)
        };

        if expired > 0 {
            model.events.notify_one();
        }

        tokio::select! {
            _ = model.expiration.notified() => {}
            _ = tokio::time::sleep(wake_after) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Registration expiry task shutting down");
                    break;
                }
            }
        }
    }
}
