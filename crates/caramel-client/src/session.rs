//! Client-side session lifecycle.
//!
//! A [`SessionManager`] owns at most one live session. Connecting validates
//! the endpoint, closes whatever channels were open, opens the control
//! channel, checks the host's driver service and then opens the joint
//! stream. Each open is bounded by the ping timeout. Only one attempt runs
//! at a time.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use caramel_core::ids::SessionId;
use caramel_core::protocol::{JointPose, STATUS_HEALTHY};
use caramel_core::{CaramelError, JointFrame, Result, SessionStatus};
use caramel_settings::ClientSettings;
use caramel_telemetry::MetricsRecorder;

use crate::channel::{ControlChannel, PoseBatchChannel, PoseStream};
use crate::discovery::Discovery;
use crate::requested::RequestedSet;
use crate::transmitter::PoseTransmitter;

/// Result of a connect request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected(SocketAddr),
    /// Another attempt was already running; this one was ignored.
    InProgress,
}

/// The live connection to one host.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub endpoint: SocketAddr,
    pub status: SessionStatus,
    pub opened_at: DateTime<Utc>,
    pub last_contact_at: Option<DateTime<Utc>>,
}

impl Session {
    fn new(endpoint: SocketAddr) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            endpoint,
            status: SessionStatus::Success,
            opened_at: now,
            last_contact_at: Some(now),
        }
    }
}

/// Parse a user-entered address. Accepts dotted IPv4 and IPv6 literals.
pub fn validate_endpoint(address: &str, port: u16) -> Result<SocketAddr> {
    let trimmed = address.trim();
    let ip: IpAddr = trimmed
        .parse()
        .map_err(|_| CaramelError::InvalidAddress(format!("not an IP address: {trimmed:?}")))?;
    if port == 0 {
        return Err(CaramelError::InvalidAddress("port must be 1-65535".into()));
    }
    Ok(SocketAddr::new(ip, port))
}

#[derive(Default)]
struct Channels {
    control: Option<ControlChannel>,
    stream: Option<PoseStream>,
    poses: Option<PoseBatchChannel>,
}

impl Channels {
    async fn close_all(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!(endpoint = %stream.endpoint(), "closing pose stream");
            stream.close().await;
        }
        if let Some(mut poses) = self.poses.take() {
            debug!(endpoint = %poses.endpoint(), "closing pose batch channel");
            poses.close().await;
        }
        if let Some(control) = self.control.take() {
            debug!(endpoint = %control.endpoint(), "closing control channel");
            control.close().await;
        }
    }
}

/// Clears the in-flight flag when the attempt ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SessionManager {
    settings: ClientSettings,
    requested: RequestedSet,
    transmitter: PoseTransmitter,
    discovery: Option<Arc<Discovery>>,
    session: RwLock<Option<Session>>,
    last_error: Mutex<Option<String>>,
    channels: AsyncMutex<Channels>,
    connecting: AtomicBool,
}

impl SessionManager {
    pub fn new(settings: ClientSettings, metrics: Arc<MetricsRecorder>) -> Self {
        let requested = RequestedSet::new();
        let transmitter =
            PoseTransmitter::new(requested.clone(), settings.transmit_timeout(), metrics);
        Self {
            settings,
            requested,
            transmitter,
            discovery: None,
            session: RwLock::new(None),
            last_error: Mutex::new(None),
            channels: AsyncMutex::new(Channels::default()),
            connecting: AtomicBool::new(false),
        }
    }

    pub fn with_discovery(mut self, discovery: Arc<Discovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn requested(&self) -> &RequestedSet {
        &self.requested
    }

    pub fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.session
            .read()
            .as_ref()
            .map(|s| s.status)
            .unwrap_or_default()
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.session.read().as_ref().map(|s| s.endpoint)
    }

    /// Text of the most recent failure, cleared by the next successful connect.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::Acquire)
    }

    /// Connect to `address:port`, replacing any current session.
    pub async fn connect(&self, address: &str, port: u16) -> Result<ConnectOutcome> {
        if self
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!(address, "connect already in progress, ignoring");
            return Ok(ConnectOutcome::InProgress);
        }
        let _in_flight = InFlight(&self.connecting);

        match self.establish(address, port).await {
            Ok(endpoint) => {
                *self.last_error.lock() = None;
                Ok(ConnectOutcome::Connected(endpoint))
            }
            Err(e) => {
                warn!(address, port, error = %e, "connect failed");
                *self.last_error.lock() = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn establish(&self, address: &str, port: u16) -> Result<SocketAddr> {
        let endpoint = validate_endpoint(address, port)?;
        let timeout = self.settings.ping_timeout();

        let mut channels = self.channels.lock().await;
        channels.close_all().await;

        let control = within(timeout, ControlChannel::connect(endpoint)).await?;
        let status = match control.ping_driver_service(timeout).await {
            Ok(status) => status,
            Err(e) => {
                control.close().await;
                return Err(e);
            }
        };
        if status != STATUS_HEALTHY {
            control.close().await;
            return Err(CaramelError::protocol(
                "UNAVAILABLE",
                format!("driver service reported status {status}"),
            ));
        }

        self.requested.reset();
        let opened = within(timeout, PoseStream::open(endpoint, self.requested.clone())).await;
        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                control.close().await;
                return Err(e);
            }
        };
        channels.control = Some(control);
        channels.stream = Some(stream);

        let session = Session::new(endpoint);
        info!(session = %session.id, %endpoint, "session established");
        *self.session.write() = Some(session);
        Ok(endpoint)
    }

    /// Try the configured or last-used address first, then discovery.
    pub async fn connect_or_discover(&self) -> Result<ConnectOutcome> {
        let known = self
            .settings
            .address
            .clone()
            .map(|a| (a, self.settings.port))
            .or_else(|| self.endpoint().map(|e| (e.ip().to_string(), e.port())));

        if let Some((address, port)) = known {
            match self.connect(&address, port).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => debug!(error = %e, "known address failed, falling back to discovery"),
            }
        }

        let Some(discovery) = &self.discovery else {
            let err = CaramelError::DiscoveryNotFound;
            *self.last_error.lock() = Some(err.to_string());
            return Err(err);
        };
        let endpoint = match discovery.run().await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                *self.last_error.lock() = Some(e.to_string());
                return Err(e);
            }
        };
        self.connect(&endpoint.ip().to_string(), endpoint.port()).await
    }

    /// Ping on the control channel.
    pub async fn ping(&self) -> Result<String> {
        let channels = self.channels.lock().await;
        let control = channels
            .control
            .as_ref()
            .ok_or(CaramelError::ConnectionClosed)?;
        let reply = control
            .ping(&self.settings.device_name, self.settings.ping_timeout())
            .await?;
        self.touch();
        Ok(reply)
    }

    /// Send one capture tick. Frames outside the requested set are dropped.
    pub async fn send_frames(&self, frames: &[JointFrame]) -> Result<usize> {
        let mut channels = self.channels.lock().await;
        let Some(stream) = channels.stream.as_ref() else {
            return Err(CaramelError::ConnectionClosed);
        };
        let result = self.transmitter.transmit_frames(stream, frames).await;
        match result {
            Ok(sent) => {
                if sent > 0 {
                    self.touch();
                }
                Ok(sent)
            }
            Err(e) => {
                if let Some(stream) = channels.stream.take() {
                    stream.close().await;
                }
                self.mark_dead(&e);
                Err(e)
            }
        }
    }

    /// Send one pose batch over the `/poses` channel, opening it on first use.
    pub async fn send_poses(&self, poses: &[JointPose]) -> Result<usize> {
        let mut channels = self.channels.lock().await;
        if channels.poses.is_none() {
            let endpoint = self.endpoint().ok_or(CaramelError::ConnectionClosed)?;
            let timeout = self.settings.ping_timeout();
            channels.poses = Some(within(timeout, PoseBatchChannel::open(endpoint)).await?);
        }
        let Some(batch) = channels.poses.as_mut() else {
            return Err(CaramelError::ConnectionClosed);
        };
        let result = self.transmitter.transmit_poses(batch, poses).await;
        match result {
            Ok(sent) => {
                self.touch();
                Ok(sent)
            }
            Err(e) => {
                if let Some(mut batch) = channels.poses.take() {
                    batch.close().await;
                }
                self.mark_dead(&e);
                Err(e)
            }
        }
    }

    /// Finish the joint stream cleanly, waiting for the host's acknowledgement.
    pub async fn complete_stream(&self) -> Result<()> {
        let mut channels = self.channels.lock().await;
        let Some(stream) = channels.stream.take() else {
            return Ok(());
        };
        let result = stream.complete(self.settings.ping_timeout()).await;
        stream.close().await;
        result
    }

    /// Close every channel and forget the session.
    pub async fn disconnect(&self) {
        self.channels.lock().await.close_all().await;
        if let Some(session) = self.session.write().take() {
            info!(session = %session.id, "session closed");
        }
        self.requested.reset();
    }

    fn touch(&self) {
        if let Some(session) = self.session.write().as_mut() {
            if session.status != SessionStatus::Success {
                info!(from = %session.status, "session recovered");
            }
            session.status = SessionStatus::Success;
            session.last_contact_at = Some(Utc::now());
        }
    }

    fn mark_dead(&self, err: &CaramelError) {
        warn!(error = %err, "pose transmission failed, stream dropped");
        if let Some(session) = self.session.write().as_mut() {
            session.status = SessionStatus::ConnectionDead;
        }
        *self.last_error.lock() = Some(err.to_string());
    }
}

/// Bound a channel open by `limit`.
async fn within<T>(limit: Duration, open: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, open)
        .await
        .map_err(|_| CaramelError::Timeout(limit))?
}
