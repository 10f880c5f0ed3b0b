//! One task per subscribed WebSocket: `Connecting -> Registered -> Closed`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use policy_core::SubscriberId;
use tokio::time::Interval;
use tracing::{debug, error, info, instrument};

use crate::config::ServerConfig;
use crate::registry::{ConnectionRegistry, Subscriber};
use crate::service::PolicyService;

/// Per-connection settings taken from [`ServerConfig`].
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    pub heartbeat: Option<Duration>,
}

impl From<&ServerConfig> for SessionConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            heartbeat: (config.heartbeat_interval_secs > 0)
                .then(|| Duration::from_secs(config.heartbeat_interval_secs)),
        }
    }
}

/// Why a session reached `Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The initial snapshot could not be built or written; never registered.
    SnapshotFailed,
    ClientClosed,
    ReceiveError,
    SendError,
    /// The registry dropped this subscriber after a failed delivery.
    Evicted,
}

/// Unregisters on drop, so every exit path (including unwinding) leaves the registry.
struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: SubscriberId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
    }
}

/// Drive one subscriber connection until it closes.
///
/// The first frame is the full policy list. After that the session forwards
/// notifications queued by the registry, echoes whatever the client sends,
/// and pings on the heartbeat interval.
#[instrument(skip_all, fields(subscriber_id))]
pub async fn run_session(
    socket: WebSocket,
    service: Arc<PolicyService>,
    config: SessionConfig,
) -> CloseReason {
    let (subscriber, mut outbound) = Subscriber::channel();
    let id = subscriber.id().clone();
    tracing::Span::current().record("subscriber_id", id.as_str());
    let (mut sink, mut stream) = socket.split();

    let snapshot = match service
        .list_all()
        .map_err(|e| e.to_string())
        .and_then(|policies| serde_json::to_string(&policies).map_err(|e| e.to_string()))
    {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "could not build policy snapshot");
            let _ = sink.close().await;
            return CloseReason::SnapshotFailed;
        }
    };
    if let Err(e) = sink.send(Message::Text(snapshot.into())).await {
        debug!(error = %e, "could not send policy snapshot");
        return CloseReason::SnapshotFailed;
    }

    let registry = Arc::clone(service.registry());
    registry.register(subscriber);
    let registration = Registration { registry, id };
    info!("subscriber connected");

    let mut heartbeat = config.heartbeat.map(tokio::time::interval);
    if let Some(interval) = heartbeat.as_mut() {
        interval.tick().await; // consume first immediate tick
    }

    let reason = loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    debug!(len = text.len(), "echoing text frame");
                    if sink.send(Message::Text(text)).await.is_err() {
                        break CloseReason::SendError;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if sink.send(Message::Binary(data)).await.is_err() {
                        break CloseReason::SendError;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break CloseReason::ClientClosed,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "receive failed");
                    break CloseReason::ReceiveError;
                }
            },
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break CloseReason::SendError;
                    }
                }
                None => break CloseReason::Evicted,
            },
            () = next_heartbeat(&mut heartbeat) => {
                if sink.send(Message::Ping(Default::default())).await.is_err() {
                    break CloseReason::SendError;
                }
            }
        }
    };

    drop(registration);
    let _ = sink.close().await;
    info!(?reason, "subscriber disconnected");
    reason
}

async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
