//! Requested-joint updates sent back to the capture client.
//!
//! The host counts head frames per stream and, every `threshold`-th head
//! frame, asks the injected [`JointEnablement`] which roles the user has
//! turned on. The answer becomes the device-name list the client should
//! stream next.

use caramel_core::joints::{self, JointRole, HEAD_JOINT};
use caramel_core::protocol::JointsResponse;
use caramel_core::{CaramelError, Result};

/// Which roles the host currently consumes.
pub trait JointEnablement: Send + Sync {
    fn enabled_roles(&self) -> Result<Vec<JointRole>>;
}

impl<F> JointEnablement for F
where
    F: Fn() -> Result<Vec<JointRole>> + Send + Sync,
{
    fn enabled_roles(&self) -> Result<Vec<JointRole>> {
        self()
    }
}

/// Every non-manual role.
pub struct AllJoints;

impl JointEnablement for AllJoints {
    fn enabled_roles(&self) -> Result<Vec<JointRole>> {
        Ok(JointRole::ALL.to_vec())
    }
}

/// A fixed role set.
pub struct StaticEnablement(pub Vec<JointRole>);

impl JointEnablement for StaticEnablement {
    fn enabled_roles(&self) -> Result<Vec<JointRole>> {
        Ok(self.0.clone())
    }
}

/// Counts head frames on one stream.
#[derive(Debug)]
pub struct SubscriptionDebouncer {
    threshold: u32,
    head_frames: u32,
}

impl SubscriptionDebouncer {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            head_frames: 0,
        }
    }

    /// Feed one frame name; `true` when an update is due. Only head frames
    /// advance the counter.
    pub fn observe(&mut self, name: &str) -> bool {
        if name != HEAD_JOINT {
            return false;
        }
        self.head_frames += 1;
        if self.head_frames >= self.threshold {
            self.head_frames = 0;
            return true;
        }
        false
    }

    pub fn head_frames(&self) -> u32 {
        self.head_frames
    }
}

/// The outcome of one enablement query.
#[derive(Clone, Debug)]
pub struct RequestedJoints {
    /// Device names to stream, in role order.
    pub names: Vec<&'static str>,
    /// Roles that stay tracked; everything else is marked not tracked.
    pub keep: Vec<JointRole>,
    /// Set when the query failed and the head-only fallback was used.
    pub fallback: Option<CaramelError>,
}

impl RequestedJoints {
    pub fn response(&self) -> JointsResponse {
        JointsResponse {
            names: self.names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

/// Resolve the requested set. The head is always kept: its frames drive the
/// update cadence.
pub fn resolve_requested(enablement: &dyn JointEnablement) -> RequestedJoints {
    match enablement.enabled_roles() {
        Ok(mut roles) => {
            roles.retain(|r| *r != JointRole::Manual);
            if !roles.contains(&JointRole::Head) {
                roles.push(JointRole::Head);
            }
            RequestedJoints {
                names: joints::names_for_roles(&roles),
                keep: roles,
                fallback: None,
            }
        }
        Err(e) => RequestedJoints {
            names: vec![HEAD_JOINT],
            keep: vec![JointRole::Head],
            fallback: Some(e),
        },
    }
}
