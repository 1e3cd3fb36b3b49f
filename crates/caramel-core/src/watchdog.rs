//! Liveness supervision for the tracking link.
//!
//! Every inbound ping or stream message calls [`LivenessMonitor::record_contact`],
//! which moves the status to `Success` and re-arms a single-shot timer. If the
//! timer fires before the next contact the status drops to `ConnectionDead`.
//! Faults disarm the timer, so a fault status holds until the next contact.
//! Each re-arm bumps a generation counter; a timer that fires after being
//! superseded sees a stale generation and does nothing.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::{CaramelError, ProtocolFault};
use crate::status::SessionStatus;

/// Default silence budget before the link is declared dead.
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(3);

/// Receives status transitions.
///
/// Called with the monitor's lock held, once per actual change. Implementations
/// must not call back into the monitor.
pub trait StatusListener: Send + Sync {
    fn on_status_changed(&self, old: SessionStatus, new: SessionStatus);
}

/// Listener that ignores every transition.
pub struct NoopListener;

impl StatusListener for NoopListener {
    fn on_status_changed(&self, _old: SessionStatus, _new: SessionStatus) {}
}

// ── Timer ──

/// A cancellable one-shot tokio timer. Arming always aborts the pending task
/// first, so at most one callback is ever scheduled.
#[derive(Default)]
pub struct SingleShotTimer {
    handle: Option<JoinHandle<()>>,
}

impl SingleShotTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending fire and schedule `on_fire` after `delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(&mut self, delay: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.disarm();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire();
        }));
    }

    pub fn disarm(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for SingleShotTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

// ── Monitor ──

struct Inner {
    status: SessionStatus,
    fault: Option<ProtocolFault>,
    last_contact_at: Option<DateTime<Utc>>,
    last_contact: Option<Instant>,
    generation: u64,
    timer: SingleShotTimer,
}

impl Inner {
    fn transition(&mut self, listener: &dyn StatusListener, new: SessionStatus) -> bool {
        let old = self.status;
        if old == new {
            return false;
        }
        self.status = new;
        debug!(from = %old, to = %new, "status changed");
        listener.on_status_changed(old, new);
        true
    }

    fn holds_transport_fault(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::ErrorInit | SessionStatus::ErrorPortsTaken
        )
    }
}

/// Status state machine plus its watchdog timer.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LivenessMonitor {
    inner: Arc<Mutex<Inner>>,
    timeout: Duration,
    listener: Arc<dyn StatusListener>,
}

impl LivenessMonitor {
    pub fn new(timeout: Duration, listener: Arc<dyn StatusListener>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                status: SessionStatus::NotStarted,
                fault: None,
                last_contact_at: None,
                last_contact: None,
                generation: 0,
                timer: SingleShotTimer::new(),
            })),
            timeout,
            listener,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(timeout, Arc::new(NoopListener))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock().status
    }

    pub fn fault(&self) -> Option<ProtocolFault> {
        self.inner.lock().fault.clone()
    }

    pub fn last_contact_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_contact_at
    }

    /// Time since the last recorded contact.
    pub fn silence(&self) -> Option<Duration> {
        self.inner.lock().last_contact.map(|at| at.elapsed())
    }

    pub fn is_armed(&self) -> bool {
        self.inner.lock().timer.is_armed()
    }

    /// Status text for display.
    pub fn status_message(&self) -> String {
        let inner = self.inner.lock();
        inner.status.message(inner.fault.as_ref())
    }

    /// Start the silence countdown without touching the status.
    pub fn arm(&self) {
        let mut inner = self.inner.lock();
        self.schedule(&mut inner);
    }

    /// A ping or stream message arrived.
    ///
    /// Transport faults hold until [`reset`](Self::reset); contact does not
    /// clear them.
    pub fn record_contact(&self) {
        let mut inner = self.inner.lock();
        if inner.holds_transport_fault() {
            return;
        }
        inner.last_contact_at = Some(Utc::now());
        inner.last_contact = Some(Instant::now());
        if inner.transition(&*self.listener, SessionStatus::Success) {
            inner.fault = None;
        }
        self.schedule(&mut inner);
    }

    /// Apply a fault. Errors that carry no status are ignored.
    pub fn fail(&self, err: &CaramelError) {
        let Some(next) = SessionStatus::for_error(err) else {
            return;
        };
        let mut inner = self.inner.lock();
        match err {
            CaramelError::ProtocolFault(fault) => {
                warn!(code = %fault.code, detail = %fault.detail, "protocol fault");
                inner.fault = Some(fault.clone());
                inner.generation += 1;
                inner.timer.disarm();
            }
            CaramelError::TransportFault { .. } => {
                warn!(error = %err, "transport fault");
                inner.generation += 1;
                inner.timer.disarm();
            }
            _ => {}
        }
        inner.transition(&*self.listener, next);
    }

    /// Disarm and return to `NotStarted`.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.timer.disarm();
        inner.fault = None;
        inner.last_contact = None;
        inner.last_contact_at = None;
        inner.transition(&*self.listener, SessionStatus::NotStarted);
    }

    fn schedule(&self, inner: &mut Inner) {
        inner.generation += 1;
        let generation = inner.generation;
        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        let listener = Arc::clone(&self.listener);
        let timeout = self.timeout;

        inner.timer.arm(timeout, move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let mut inner = shared.lock();
            if inner.generation != generation || inner.holds_transport_fault() {
                return;
            }
            if inner.transition(&*listener, SessionStatus::ConnectionDead) {
                info!(timeout_ms = timeout.as_millis() as u64, "no traffic, connection dead");
            }
        });
    }
}

impl std::fmt::Debug for LivenessMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LivenessMonitor")
            .field("status", &inner.status)
            .field("timeout", &self.timeout)
            .field("generation", &inner.generation)
            .finish()
    }
}
