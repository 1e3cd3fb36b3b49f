//! WebSocket loops for `/rpc`, `/joints` and `/poses`.
//!
//! Each connection is read on the upgrade task. Every inbound text frame
//! counts as contact for the liveness monitor; malformed frames become
//! protocol faults.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use caramel_core::ids::ConnectionId;
use caramel_core::protocol::{self, ClientStreamMessage, HostStreamMessage, JointPose};
use caramel_core::{CaramelError, Result};
use caramel_telemetry::names;

use crate::driver::DriverState;
use crate::handlers;
use crate::registry::ConnectionKind;
use crate::rpc;
use crate::server::AppState;
use crate::subscription::SubscriptionDebouncer;

type WsSink = SplitSink<WebSocket, Message>;

/// Registers a connection for its lifetime.
struct ConnectionGuard {
    state: Arc<DriverState>,
    id: ConnectionId,
    kind: ConnectionKind,
}

impl ConnectionGuard {
    fn open(state: &Arc<DriverState>, kind: ConnectionKind, peer: SocketAddr) -> Self {
        let id = state.connections().register(kind, peer);
        state
            .metrics()
            .gauge_inc(names::ACTIVE_STREAMS, &[("kind", kind.as_str())], 1.0);
        info!(conn = %id, kind = kind.as_str(), %peer, "client connected");
        Self {
            state: Arc::clone(state),
            id,
            kind,
        }
    }

    fn touch(&self) {
        self.state.connections().touch(&self.id);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.connections().unregister(&self.id);
        self.state
            .metrics()
            .gauge_inc(names::ACTIVE_STREAMS, &[("kind", self.kind.as_str())], -1.0);
        info!(conn = %self.id, kind = self.kind.as_str(), "client disconnected");
    }
}

async fn send_json<T: Serialize>(sink: &mut WsSink, message: &T) -> Result<()> {
    let text = protocol::encode(message)?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|_| CaramelError::ConnectionClosed)
}

/// Next text frame, or `None` once the socket closes or the run is cancelled.
async fn next_text(
    rx: &mut futures::stream::SplitStream<WebSocket>,
    app: &AppState,
    sink: &mut WsSink,
) -> Option<String> {
    loop {
        let msg = tokio::select! {
            () = app.cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return None;
            }
            msg = rx.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => return Some(text.as_str().to_owned()),
            Some(Ok(Message::Close(_))) | None => return None,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(error = %e, "socket read failed");
                return None;
            }
        }
    }
}

/// Unary request/response loop.
pub async fn serve_rpc(socket: WebSocket, app: AppState, peer: SocketAddr) {
    let guard = ConnectionGuard::open(&app.driver, ConnectionKind::Rpc, peer);
    let (mut sink, mut rx) = socket.split();

    while let Some(raw) = next_text(&mut rx, &app, &mut sink).await {
        guard.touch();
        let response = match rpc::parse_request(&raw) {
            Ok(request) => handlers::dispatch(&app.driver, request),
            Err(e) => {
                warn!(error = %e, "malformed rpc frame");
                app.driver.monitor().fail(&e);
                rpc::parse_error(e.to_string())
            }
        };
        if send_json(&mut sink, &response).await.is_err() {
            break;
        }
    }
}

/// Client-streaming joint frames. The host answers with requested-joint
/// updates on the same socket and closes after `Completed`.
pub async fn serve_joints(socket: WebSocket, app: AppState, peer: SocketAddr) {
    let guard = ConnectionGuard::open(&app.driver, ConnectionKind::Joints, peer);
    let (mut sink, mut rx) = socket.split();
    let mut debouncer = SubscriptionDebouncer::new(app.driver.subscription_threshold());

    while let Some(raw) = next_text(&mut rx, &app, &mut sink).await {
        guard.touch();
        match protocol::decode::<ClientStreamMessage>(&raw) {
            Ok(ClientStreamMessage::Joint(joint)) => {
                let due = debouncer.observe(&joint.name);
                // Unknown joints are counted and skipped inside ingest.
                let _ = app.driver.ingest_joint(joint.into());
                if due {
                    let requested = app.driver.refresh_requested();
                    let update = HostStreamMessage::Joints(requested.response());
                    if send_json(&mut sink, &update).await.is_err() {
                        break;
                    }
                }
            }
            Ok(ClientStreamMessage::Complete) => {
                app.driver.record_contact();
                let _ = send_json(&mut sink, &HostStreamMessage::Completed).await;
                let _ = sink.close().await;
                break;
            }
            Ok(ClientStreamMessage::Pose(_)) => {
                app.driver.monitor().fail(&CaramelError::protocol(
                    rpc::INVALID_REQUEST,
                    "pose frame on joint stream",
                ));
            }
            Err(e) => {
                warn!(error = %e, "malformed joint frame");
                app.driver.monitor().fail(&e);
            }
        }
    }
}

/// Batched pose calls. Each `Complete` applies the batch and is answered
/// with `Completed`; the socket stays open for the next batch.
pub async fn serve_poses(socket: WebSocket, app: AppState, peer: SocketAddr) {
    let guard = ConnectionGuard::open(&app.driver, ConnectionKind::Poses, peer);
    let (mut sink, mut rx) = socket.split();
    let mut batch: Vec<JointPose> = Vec::new();

    while let Some(raw) = next_text(&mut rx, &app, &mut sink).await {
        guard.touch();
        match protocol::decode::<ClientStreamMessage>(&raw) {
            Ok(ClientStreamMessage::Pose(pose)) => {
                app.driver.record_contact();
                batch.push(pose);
            }
            Ok(ClientStreamMessage::Complete) => {
                let tracked = app.driver.ingest_poses(&batch);
                debug!(poses = batch.len(), tracked, "pose batch applied");
                batch.clear();
                if send_json(&mut sink, &HostStreamMessage::Completed).await.is_err() {
                    break;
                }
            }
            Ok(ClientStreamMessage::Joint(_)) => {
                app.driver.monitor().fail(&CaramelError::protocol(
                    rpc::INVALID_REQUEST,
                    "joint frame on pose stream",
                ));
            }
            Err(e) => {
                warn!(error = %e, "malformed pose frame");
                app.driver.monitor().fail(&e);
            }
        }
    }

    if !batch.is_empty() {
        debug!(poses = batch.len(), "pose stream ended with an unfinished batch");
    }
}
