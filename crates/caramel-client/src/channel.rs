//! WebSocket channels to the host: the unary control channel, the joint
//! stream and the pose-batch channel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use caramel_core::protocol::{
    self, ClientStreamMessage, DataJoint, HostStreamMessage, JointPose, PingReply, PingRequest,
    RpcRequest, RpcResponse, StatusResponse, JOINTS_PATH, METHOD_PING,
    METHOD_PING_DRIVER_SERVICE, POSES_PATH, RPC_PATH,
};
use caramel_core::{CaramelError, JointFrame, Result, TransportFaultKind};

use crate::requested::RequestedSet;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn open(endpoint: SocketAddr, path: &str) -> Result<WsStream> {
    let url = format!("ws://{endpoint}{path}");
    let (ws, _) = connect_async(&url)
        .await
        .map_err(|e| CaramelError::TransportFault {
            kind: TransportFaultKind::Init,
            message: format!("connect {url}: {e}"),
        })?;
    debug!(%url, "channel opened");
    Ok(ws)
}

async fn send_json<S, T>(sink: &mut S, message: &T) -> Result<()>
where
    S: Sink<Message> + Unpin,
    T: Serialize,
{
    let text = protocol::encode(message)?;
    sink.send(Message::text(text))
        .await
        .map_err(|_| CaramelError::ConnectionClosed)
}

/// Next text frame; `ConnectionClosed` once the socket ends.
async fn next_text<S>(stream: &mut S) -> Result<String>
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_owned()),
            Some(Ok(Message::Close(_))) | None => return Err(CaramelError::ConnectionClosed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(error = %e, "socket read failed");
                return Err(CaramelError::ConnectionClosed);
            }
        }
    }
}

/// Request/response channel on `/rpc`. Calls are serialized.
pub struct ControlChannel {
    endpoint: SocketAddr,
    ws: Mutex<WsStream>,
    next_id: AtomicU64,
}

impl ControlChannel {
    pub async fn connect(endpoint: SocketAddr) -> Result<Self> {
        Ok(Self {
            endpoint,
            ws: Mutex::new(open(endpoint, RPC_PATH).await?),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// One call, bounded by `timeout`.
    pub async fn call<P, R>(&self, method: &str, params: &P, timeout: Duration) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(id, method, serde_json::to_value(params)?);

        let exchange = async {
            let mut ws = self.ws.lock().await;
            send_json(&mut *ws, &request).await?;
            loop {
                let raw = next_text(&mut *ws).await?;
                let response: RpcResponse = protocol::decode(&raw)?;
                if response.id.as_ref().and_then(|v| v.as_u64()) == Some(id) {
                    return Ok::<_, CaramelError>(response);
                }
                debug!(method, "skipping stale rpc response");
            }
        };
        let response = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| CaramelError::Timeout(timeout))??;

        if let Some(err) = response.error {
            return Err(CaramelError::protocol(err.code, err.message));
        }
        let result = response.result.unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(result)?)
    }

    pub async fn ping(&self, name: &str, timeout: Duration) -> Result<String> {
        let reply: PingReply = self
            .call(
                METHOD_PING,
                &PingRequest {
                    name: name.to_string(),
                },
                timeout,
            )
            .await?;
        Ok(reply.message)
    }

    /// Returns the host's service status; `1` is healthy.
    pub async fn ping_driver_service(&self, timeout: Duration) -> Result<i32> {
        let reply: StatusResponse = self
            .call(METHOD_PING_DRIVER_SERVICE, &protocol::Empty {}, timeout)
            .await?;
        Ok(reply.status)
    }

    pub async fn close(&self) {
        let mut ws = self.ws.lock().await;
        if let Err(e) = ws.close(None).await {
            debug!(error = %e, "control channel close failed");
        }
    }
}

/// Continuous joint stream on `/joints`.
///
/// A reader task applies the host's requested-joint updates to the shared
/// [`RequestedSet`] while frames are written.
pub struct PoseStream {
    endpoint: SocketAddr,
    sink: Mutex<SplitSink<WsStream, Message>>,
    open: Arc<AtomicBool>,
    completed: Mutex<Option<oneshot::Receiver<()>>>,
    reader: JoinHandle<()>,
}

impl PoseStream {
    pub async fn open(endpoint: SocketAddr, requested: RequestedSet) -> Result<Self> {
        let ws = open(endpoint, JOINTS_PATH).await?;
        let (sink, stream) = ws.split();
        let open = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = oneshot::channel();
        let reader = tokio::spawn(read_updates(stream, requested, Arc::clone(&open), done_tx));
        Ok(Self {
            endpoint,
            sink: Mutex::new(sink),
            open,
            completed: Mutex::new(Some(done_rx)),
            reader,
        })
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub async fn send_frame(&self, frame: &JointFrame) -> Result<()> {
        if !self.is_open() {
            return Err(CaramelError::ConnectionClosed);
        }
        let message = ClientStreamMessage::Joint(DataJoint::from(frame));
        send_json(&mut *self.sink.lock().await, &message).await
    }

    /// Send several frames in order under one lock.
    pub async fn send_frames(&self, frames: &[&JointFrame]) -> Result<()> {
        if !self.is_open() {
            return Err(CaramelError::ConnectionClosed);
        }
        let mut sink = self.sink.lock().await;
        for frame in frames {
            send_json(&mut *sink, &ClientStreamMessage::Joint(DataJoint::from(*frame))).await?;
        }
        Ok(())
    }

    /// Finish the call and wait for the host's `completed`.
    pub async fn complete(&self, timeout: Duration) -> Result<()> {
        send_json(&mut *self.sink.lock().await, &ClientStreamMessage::Complete).await?;
        let Some(done) = self.completed.lock().await.take() else {
            return Ok(());
        };
        match tokio::time::timeout(timeout, done).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(CaramelError::ConnectionClosed),
            Err(_) => Err(CaramelError::Timeout(timeout)),
        }
    }

    pub async fn close(&self) {
        self.open.store(false, Ordering::Release);
        if let Err(e) = self.sink.lock().await.close().await {
            debug!(error = %e, "pose stream close failed");
        }
        self.reader.abort();
    }
}

impl Drop for PoseStream {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_updates(
    mut stream: SplitStream<WsStream>,
    requested: RequestedSet,
    open: Arc<AtomicBool>,
    done: oneshot::Sender<()>,
) {
    let mut done = Some(done);
    while let Ok(raw) = next_text(&mut stream).await {
        match protocol::decode::<HostStreamMessage>(&raw) {
            Ok(HostStreamMessage::Joints(update)) => {
                debug!(names = ?update.names, "host requested joints");
                requested.replace(update.names);
            }
            Ok(HostStreamMessage::Completed) => {
                if let Some(tx) = done.take() {
                    let _ = tx.send(());
                }
            }
            Err(e) => warn!(error = %e, "ignoring malformed host frame"),
        }
    }
    open.store(false, Ordering::Release);
    debug!("pose stream reader finished");
}

/// Batched pose calls on `/poses`. One socket carries every batch.
pub struct PoseBatchChannel {
    endpoint: SocketAddr,
    ws: WsStream,
}

impl PoseBatchChannel {
    pub async fn open(endpoint: SocketAddr) -> Result<Self> {
        Ok(Self {
            endpoint,
            ws: open(endpoint, POSES_PATH).await?,
        })
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Write one batch and wait for the host to acknowledge it.
    pub async fn send_batch(&mut self, poses: &[JointPose]) -> Result<()> {
        for pose in poses {
            send_json(&mut self.ws, &ClientStreamMessage::Pose(pose.clone())).await?;
        }
        send_json(&mut self.ws, &ClientStreamMessage::Complete).await?;
        loop {
            let raw = next_text(&mut self.ws).await?;
            if let HostStreamMessage::Completed = protocol::decode::<HostStreamMessage>(&raw)? {
                return Ok(());
            }
        }
    }

    pub async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!(error = %e, "pose batch channel close failed");
        }
    }
}
