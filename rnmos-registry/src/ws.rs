//! The query WebSocket listener
//!
//! Subscription clients connect to the `ws_href` returned by
//! `POST /subscriptions`: `/x-nmos/query/{version}/subscriptions/{id}` on
//! the query WebSocket port. The connection lifecycle:
//!
//! 1. **Validate** — the path must identify an existing subscription; an
//!    unknown target is closed immediately, before any grain is sent.
//! 2. **Open** — a session attaches to the subscription and a sync grain
//!    describing the current matching set (`pre` absent, `post` = current)
//!    is queued for the fanout worker.
//! 3. **Close** — the session detaches; a non-persistent subscription with
//!    no remaining sessions is deleted, which itself produces a deletion
//!    event for `/subscriptions` subscribers.
//!
//! Each connection runs two tasks: a writer draining the session's channel
//! into the socket and a reader consuming frames until the peer closes.

use crate::events::Change;
use crate::model::{PendingChange, RegistryModel, WsSession};
use crate::query::ResourceQuery;
use futures::{SinkExt, StreamExt};
use rnmos_core::{ApiError, Result, Tai};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

/// Accept query WebSocket connections until shutdown
pub async fn run_query_ws_listener(
    model: Arc<RegistryModel>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        tracing::debug!(addr = %addr, "Query WebSocket connection accepted");
                        let model = model.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_query_ws(model, stream).await {
                                tracing::error!(error = %e, "Query WebSocket connection error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Query WebSocket accept error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Query WebSocket listener shutting down");
                    break;
                }
            }
        }
    }
}

/// The subscription id encoded in a connection path, if the path is valid
fn subscription_id_from_path(path: &str) -> Option<&str> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["x-nmos", "query", _version, "subscriptions", id] => Some(id),
        _ => None,
    }
}

async fn handle_query_ws(model: Arc<RegistryModel>, stream: TcpStream) -> Result<()> {
    let mut request_path = None;
    let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &tokio_tungstenite::tungstenite::handshake::server::Request, response| {
        request_path = Some(req.uri().path().to_string());
        Ok(response)
    })
    .await
    .map_err(|e| ApiError::WebSocket(e.to_string()))?;

    let path = request_path.unwrap_or_default();
    let attached = match subscription_id_from_path(&path) {
        Some(id) => attach_session(&model, id).await,
        None => None,
    };

    let Some((session_id, mut rx)) = attached else {
        tracing::info!(path = %path, "Rejecting connection for unknown subscription");
        let mut ws = ws;
        let _ = ws.close(None).await;
        return Ok(());
    };

    // wake the fanout worker so the sync grain goes out promptly
    model.events.notify_one();

    let (mut sink, mut source) = ws.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = source.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => break,
                // subscribers only listen; other frames are ignored
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    detach_session(&model, session_id).await;
    Ok(())
}

/// Attach a new session to a subscription, queuing its sync grain
///
/// Returns the session id and the channel the socket writer drains, or
/// `None` when the subscription does not exist.
async fn attach_session(
    model: &Arc<RegistryModel>,
    subscription_id: &str,
) -> Option<(u64, mpsc::UnboundedReceiver<Message>)> {
    let mut locked = model.model.lock().await;

    let subscription = locked.resources.find(subscription_id)?;
    if subscription.type_ != rnmos_core::ResourceType::Subscription {
        return None;
    }
    let data = subscription.data.clone();

    let empty_params = Value::Object(Map::new());
    let params = data.get("params").unwrap_or(&empty_params);
    let filter = match ResourceQuery::from_params(params) {
        Ok(filter) => filter,
        Err(e) => {
            tracing::error!(subscription = subscription_id, error = %e, "Bad subscription params");
            return None;
        }
    };

    let resource_path = data
        .get("resource_path")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let max_update_rate =
        Duration::from_millis(data.get("max_update_rate_ms").and_then(Value::as_u64).unwrap_or(100));
    let persist = data.get("persist").and_then(Value::as_bool).unwrap_or(false);

    let (tx, rx) = mpsc::unbounded_channel();
    let mut session = WsSession {
        subscription_id: subscription_id.to_string(),
        resource_path,
        filter,
        max_update_rate,
        persist,
        tx,
        pending: Vec::new(),
        last_send: None,
        sent_grains: 0,
    };

    // sync grain: the current matching set as (pre absent, post = current)
    let now = Tai::now();
    let mut sync = Vec::new();
    for resource in locked.resources.iterate() {
        let topic = format!("/{}", resource.type_.path_segment());
        if session.matches_topic(&topic) && session.filter.matches(&resource.data) {
            sync.push(PendingChange {
                change: Change {
                    path: resource.id.clone(),
                    pre: None,
                    post: Some(resource.data.clone()),
                },
                updated: now,
            });
        }
    }
    session.pending = sync;

    let session_id = locked.insert_session(session);
    tracing::info!(
        subscription = subscription_id,
        session = session_id,
        "Query WebSocket session opened"
    );
    Some((session_id, rx))
}

/// Detach a session; delete a non-persistent subscription on last close
async fn detach_session(model: &Arc<RegistryModel>, session_id: u64) {
    let deleted = {
        let mut locked = model.model.lock().await;
        let Some(session) = locked.remove_session(session_id) else {
            return;
        };
        tracing::info!(
            subscription = %session.subscription_id,
            session = session_id,
            "Query WebSocket session closed"
        );
        if !session.persist
            && locked.sessions_for(&session.subscription_id) == 0
            && locked.resources.find(&session.subscription_id).is_some()
        {
            let removed = locked.resources.erase(&session.subscription_id);
            let base = locked.resources.strictly_increasing_update();
            let events = crate::events::removal_events(&removed, base);
            locked.push_events(events);
            true
        } else {
            false
        }
    };
    if deleted {
        model.events.notify_one();
    }
}
