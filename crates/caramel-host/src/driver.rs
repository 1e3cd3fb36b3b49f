//! The host-side tracking driver.
//!
//! [`DriverState`] is the shared context every route handler sees: the
//! liveness monitor, the joint table, the enablement source and metrics.
//! [`HostDriver`] owns one `DriverState` plus whatever is running for the
//! current initialization (RPC service, DNS-SD record, legacy responder) and
//! drives the initialize/shutdown lifecycle.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use caramel_core::joints::JointRole;
use caramel_core::protocol::JointPose;
use caramel_core::{JointFrame, LivenessMonitor, Result, SessionStatus, StatusListener};
use caramel_settings::HostSettings;
use caramel_telemetry::{names, MetricsRecorder};

use crate::advertise::{self, LegacyResponder, MdnsAdvertiser};
use crate::registry::{ConnectionRegistry, ConnectionSummary};
use crate::server::{self, ServerConfig, ServerHandle};
use crate::subscription::{self, JointEnablement, RequestedJoints};
use crate::tracker::{JointTracker, TrackedJoint};

/// Logs and counts status transitions, then forwards them.
struct StatusRelay {
    metrics: Arc<MetricsRecorder>,
    downstream: Option<Arc<dyn StatusListener>>,
}

impl StatusListener for StatusRelay {
    fn on_status_changed(&self, old: SessionStatus, new: SessionStatus) {
        info!(from = %old, to = %new, code = new.code(), "device status changed");
        let to = new.to_string();
        self.metrics
            .counter_inc(names::STATUS_TRANSITIONS, &[("to", to.as_str())], 1);
        if let Some(downstream) = &self.downstream {
            downstream.on_status_changed(old, new);
        }
    }
}

/// What the host reads on each of its frames.
#[derive(Clone, Debug)]
pub struct TrackingSnapshot {
    pub skeleton_tracked: bool,
    pub status: SessionStatus,
    pub joints: Vec<TrackedJoint>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: String,
    pub code: i32,
    pub message: String,
    pub initialized: bool,
    pub skeleton_tracked: bool,
    pub last_contact_at: Option<DateTime<Utc>>,
    pub connections: Vec<ConnectionSummary>,
}

/// Shared state behind every route.
pub struct DriverState {
    monitor: LivenessMonitor,
    tracker: JointTracker,
    enablement: Arc<dyn JointEnablement>,
    metrics: Arc<MetricsRecorder>,
    connections: ConnectionRegistry,
    subscription_threshold: u32,
    initialized: AtomicBool,
}

impl DriverState {
    pub fn new(
        settings: &HostSettings,
        enablement: Arc<dyn JointEnablement>,
        metrics: Arc<MetricsRecorder>,
        listener: Option<Arc<dyn StatusListener>>,
    ) -> Self {
        let relay = StatusRelay {
            metrics: Arc::clone(&metrics),
            downstream: listener,
        };
        Self {
            monitor: LivenessMonitor::new(settings.watchdog_timeout(), Arc::new(relay)),
            tracker: JointTracker::new(),
            enablement,
            metrics,
            connections: ConnectionRegistry::new(),
            subscription_threshold: settings.subscription_threshold,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn monitor(&self) -> &LivenessMonitor {
        &self.monitor
    }

    pub fn tracker(&self) -> &JointTracker {
        &self.tracker
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn subscription_threshold(&self) -> u32 {
        self.subscription_threshold
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn set_initialized(&self, value: bool) {
        self.initialized.store(value, Ordering::Release);
    }

    /// Status is `Success`, the driver is up and the last data described a body.
    pub fn is_skeleton_tracked(&self) -> bool {
        self.is_initialized()
            && self.monitor.status() == SessionStatus::Success
            && self.tracker.skeleton_present()
    }

    pub fn record_contact(&self) {
        self.monitor.record_contact();
    }

    /// Apply one streamed joint. Unknown names are counted and skipped.
    pub fn ingest_joint(&self, frame: JointFrame) -> Result<&'static [JointRole]> {
        self.monitor.record_contact();
        self.metrics.counter_inc(names::FRAMES_RECEIVED, &[], 1);
        match self.tracker.apply_frame(&frame) {
            Ok(roles) => Ok(roles),
            Err(e) => {
                self.metrics.counter_inc(names::UNKNOWN_JOINTS, &[], 1);
                debug!(joint = %frame.name, "skipping unknown joint");
                Err(e)
            }
        }
    }

    /// Apply one completed pose call.
    pub fn ingest_poses(&self, poses: &[JointPose]) -> bool {
        self.monitor.record_contact();
        self.metrics
            .counter_inc(names::POSES_RECEIVED, &[], poses.len() as u64);
        self.tracker.apply_poses(poses)
    }

    /// Query enablement and drop every role outside the answer.
    pub fn refresh_requested(&self) -> RequestedJoints {
        let requested = subscription::resolve_requested(self.enablement.as_ref());
        if let Some(e) = &requested.fallback {
            warn!(error = %e, "joint enablement query failed, requesting head only");
        }
        let dropped = self.tracker.restrict_to(&requested.keep);
        self.metrics.counter_inc(names::SUBSCRIPTION_UPDATES, &[], 1);
        debug!(names = ?requested.names, dropped, "requested joints updated");
        requested
    }

    pub fn snapshot(&self) -> TrackingSnapshot {
        TrackingSnapshot {
            skeleton_tracked: self.is_skeleton_tracked(),
            status: self.monitor.status(),
            joints: self.tracker.snapshot(),
        }
    }

    pub fn health(&self) -> HealthReport {
        let status = self.monitor.status();
        HealthReport {
            status: status.to_string(),
            code: status.code(),
            message: self.monitor.status_message(),
            initialized: self.is_initialized(),
            skeleton_tracked: self.is_skeleton_tracked(),
            last_contact_at: self.monitor.last_contact_at(),
            connections: self.connections.summaries(),
        }
    }
}

/// Everything started by one successful `initialize`.
struct Running {
    server: ServerHandle,
    advertiser: Option<MdnsAdvertiser>,
    legacy: Option<LegacyResponder>,
}

impl Running {
    async fn stop(self) {
        if let Some(mut advertiser) = self.advertiser {
            advertiser.withdraw();
            advertiser.shutdown();
        }
        if let Some(legacy) = self.legacy {
            legacy.stop().await;
        }
        let report = self.server.shutdown().await;
        debug!(completed = report.completed, aborted = report.aborted, "service stopped");
    }
}

/// Host-side driver. Create one per process and share it.
pub struct HostDriver {
    state: Arc<DriverState>,
    settings: HostSettings,
    running: Mutex<Option<Running>>,
}

impl HostDriver {
    pub fn new(settings: HostSettings, enablement: Arc<dyn JointEnablement>) -> Self {
        Self::with_parts(settings, enablement, Arc::new(MetricsRecorder::new()), None)
    }

    pub fn with_parts(
        settings: HostSettings,
        enablement: Arc<dyn JointEnablement>,
        metrics: Arc<MetricsRecorder>,
        listener: Option<Arc<dyn StatusListener>>,
    ) -> Self {
        let state = Arc::new(DriverState::new(&settings, enablement, metrics, listener));
        Self {
            state,
            settings,
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &Arc<DriverState> {
        &self.state
    }

    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    /// Start (or restart) the service. Bind failures set the matching
    /// transport-fault status and are returned.
    pub async fn initialize(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            info!("reinitializing, stopping previous service");
            previous.stop().await;
        }
        self.state.set_initialized(false);
        self.state.monitor.reset();
        self.state.tracker.reset();

        let config = ServerConfig::from(&self.settings);
        let server = match server::start(&config, Arc::clone(&self.state)).await {
            Ok(server) => server,
            Err(e) => {
                error!(error = %e, bind = %config.bind, port = config.port, "service failed to start");
                self.state.monitor.fail(&e);
                return Err(e);
            }
        };
        let local_addr = server.local_addr();
        let ip = advertise::advertised_ip(self.settings.advertised_ip.as_deref(), &self.settings.bind);

        let advertiser = if self.settings.advertise {
            match MdnsAdvertiser::new().and_then(|mut a| {
                a.advertise(&self.settings.instance_name, ip, local_addr.port())?;
                Ok(a)
            }) {
                Ok(a) => Some(a),
                Err(e) => {
                    warn!(error = %e, "service advertisement unavailable, manual entry still works");
                    None
                }
            }
        } else {
            None
        };

        let legacy = if self.settings.legacy_discovery {
            match LegacyResponder::start(
                &self.settings.bind,
                local_addr.port(),
                ip,
                self.settings.legacy_reply_delay(),
            )
            .await
            {
                Ok(responder) => Some(responder),
                Err(e) => {
                    warn!(error = %e, "legacy discovery responder failed to start");
                    None
                }
            }
        } else {
            None
        };

        self.state.set_initialized(true);
        self.state.monitor.arm();
        info!(%local_addr, advertised_ip = %ip, "tracking driver initialized");

        *running = Some(Running {
            server,
            advertiser,
            legacy,
        });
        Ok(local_addr)
    }

    /// Stop everything and return to `NotStarted`.
    pub async fn shutdown(&self) {
        let previous = self.running.lock().await.take();
        self.state.set_initialized(false);
        if let Some(running) = previous {
            running.stop().await;
        }
        self.state.monitor.reset();
        self.state.tracker.reset();
        self.state.connections.clear();
        info!("tracking driver shut down");
    }

    /// Per-frame read of the joint table.
    pub fn update(&self) -> TrackingSnapshot {
        self.state.snapshot()
    }

    pub fn is_skeleton_tracked(&self) -> bool {
        self.state.is_skeleton_tracked()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.monitor.status()
    }

    pub fn status_message(&self) -> String {
        self.state.monitor.status_message()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.server.local_addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::{AllJoints, StaticEnablement};
    use caramel_core::{CaramelError, Quaternion, Vector3};
    use std::time::Duration;

    fn local_settings() -> HostSettings {
        HostSettings {
            bind: "127.0.0.1".into(),
            port: 0,
            advertise: false,
            ..Default::default()
        }
    }

    fn state_with(enablement: Arc<dyn JointEnablement>) -> DriverState {
        DriverState::new(
            &HostSettings::default(),
            enablement,
            Arc::new(MetricsRecorder::new()),
            None,
        )
    }

    fn frame(name: &str) -> JointFrame {
        JointFrame::new(name, Vector3::new(0.0, 1.5, 0.0), Quaternion::IDENTITY)
    }

    #[tokio::test]
    async fn ingest_counts_frames_and_unknowns() {
        let state = state_with(Arc::new(AllJoints));
        state.ingest_joint(frame("head_joint")).unwrap();
        assert!(state.ingest_joint(frame("tail_joint")).is_err());
        assert_eq!(state.metrics().counter_get(names::FRAMES_RECEIVED, &[]), 2);
        assert_eq!(state.metrics().counter_get(names::UNKNOWN_JOINTS, &[]), 1);
        assert_eq!(state.monitor().status(), SessionStatus::Success);
    }

    #[tokio::test]
    async fn refresh_marks_disabled_roles_untracked() {
        let state = state_with(Arc::new(StaticEnablement(vec![
            JointRole::Head,
            JointRole::SpineWaist,
        ])));
        for name in ["head_joint", "hips_joint", "neck_1_joint", "right_hand_joint"] {
            state.ingest_joint(frame(name)).unwrap();
        }
        let requested = state.refresh_requested();
        assert_eq!(requested.names, vec!["head_joint", "hips_joint"]);
        assert_eq!(
            state.tracker().tracked_roles(),
            vec![JointRole::Head, JointRole::SpineWaist]
        );
        assert_eq!(state.metrics().counter_get(names::SUBSCRIPTION_UPDATES, &[]), 1);
    }

    #[tokio::test]
    async fn disabled_joint_stays_untracked_after_refresh() {
        let state = state_with(Arc::new(StaticEnablement(vec![
            JointRole::Head,
            JointRole::SpineWaist,
        ])));
        state.ingest_joint(frame("neck_1_joint")).unwrap();
        assert!(state.tracker().get(JointRole::Neck).unwrap().is_tracked);

        state.refresh_requested();
        state.ingest_joint(frame("neck_1_joint")).unwrap();
        state.ingest_joint(frame("head_joint")).unwrap();

        assert!(!state.tracker().get(JointRole::Neck).unwrap().is_tracked);
        assert_eq!(state.tracker().tracked_roles(), vec![JointRole::Head]);
    }

    #[tokio::test]
    async fn failed_enablement_keeps_only_head() {
        let failing = || -> Result<Vec<JointRole>> { Err(CaramelError::Cancelled) };
        let state = state_with(Arc::new(failing));
        state.ingest_joint(frame("head_joint")).unwrap();
        state.ingest_joint(frame("hips_joint")).unwrap();
        let requested = state.refresh_requested();
        assert_eq!(requested.names, vec!["head_joint"]);
        assert_eq!(state.tracker().tracked_roles(), vec![JointRole::Head]);
    }

    #[tokio::test]
    async fn skeleton_tracked_requires_initialized_success() {
        let state = state_with(Arc::new(AllJoints));
        state.ingest_joint(frame("head_joint")).unwrap();
        assert!(!state.is_skeleton_tracked());
        state.set_initialized(true);
        assert!(state.is_skeleton_tracked());
        state.monitor().fail(&CaramelError::protocol("UNAVAILABLE", "reset"));
        assert!(!state.is_skeleton_tracked());
    }

    #[tokio::test]
    async fn transitions_are_counted() {
        let state = state_with(Arc::new(AllJoints));
        state.record_contact();
        state.record_contact();
        assert_eq!(
            state
                .metrics()
                .counter_get(names::STATUS_TRANSITIONS, &[("to", "success")]),
            1
        );
    }

    #[tokio::test]
    async fn health_reports_status() {
        let state = state_with(Arc::new(AllJoints));
        let report = state.health();
        assert_eq!(report.code, -1);
        assert_eq!(report.status, "not_started");
        assert!(!report.initialized);
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("skeletonTracked").is_some());
    }

    #[tokio::test]
    async fn initialize_arms_watchdog_and_shutdown_resets() {
        let mut settings = local_settings();
        settings.watchdog_timeout_ms = 100;
        let driver = HostDriver::new(settings, Arc::new(AllJoints));

        let addr = driver.initialize().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(driver.state().is_initialized());
        assert_eq!(driver.local_addr().await, Some(addr));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(driver.status(), SessionStatus::ConnectionDead);

        driver.shutdown().await;
        assert_eq!(driver.status(), SessionStatus::NotStarted);
        assert!(!driver.state().is_initialized());
        assert!(driver.local_addr().await.is_none());
    }

    #[tokio::test]
    async fn port_in_use_sets_ports_taken() {
        let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = blocker.local_addr().unwrap().port();
        let settings = HostSettings {
            port,
            ..local_settings()
        };
        let driver = HostDriver::new(settings, Arc::new(AllJoints));

        let err = driver.initialize().await.unwrap_err();
        assert_eq!(err.error_kind(), "ports_taken");
        assert_eq!(driver.status(), SessionStatus::ErrorPortsTaken);
        assert!(!driver.state().is_initialized());
    }

    #[tokio::test]
    async fn bad_bind_address_sets_init_error() {
        let settings = HostSettings {
            bind: "not-an-address".into(),
            ..local_settings()
        };
        let driver = HostDriver::new(settings, Arc::new(AllJoints));
        assert!(driver.initialize().await.is_err());
        assert_eq!(driver.status(), SessionStatus::ErrorInit);
    }

    #[tokio::test]
    async fn reinitialize_replaces_the_service() {
        let driver = HostDriver::new(local_settings(), Arc::new(AllJoints));
        driver.initialize().await.unwrap();
        let second = driver.initialize().await.unwrap();
        assert!(driver.state().is_initialized());
        assert_eq!(driver.local_addr().await, Some(second));
        driver.shutdown().await;
    }
}
