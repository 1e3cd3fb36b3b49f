//! Per-role joint state the host reads once per frame.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use caramel_core::joints::{self, JointRole};
use caramel_core::protocol::JointPose;
use caramel_core::{JointFrame, Quaternion, Result, Vector3};

const ROLE_COUNT: usize = JointRole::ALL.len();

/// Latest state for one canonical role.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackedJoint {
    pub role: JointRole,
    pub is_tracked: bool,
    pub position: Vector3,
    pub orientation: Quaternion,
}

impl TrackedJoint {
    fn idle(role: JointRole) -> Self {
        Self {
            role,
            is_tracked: false,
            position: Vector3::ZERO,
            orientation: Quaternion::IDENTITY,
        }
    }
}

/// Joint table keyed by role. Later samples for a role overwrite earlier ones.
///
/// Once [`JointTracker::restrict_to`] has run, roles outside the kept set are
/// always written as not tracked.
pub struct JointTracker {
    joints: RwLock<[TrackedJoint; ROLE_COUNT]>,
    allowed: RwLock<Option<Vec<JointRole>>>,
    skeleton_present: AtomicBool,
}

impl Default for JointTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl JointTracker {
    pub fn new() -> Self {
        Self {
            joints: RwLock::new(JointRole::ALL.map(TrackedJoint::idle)),
            allowed: RwLock::new(None),
            skeleton_present: AtomicBool::new(false),
        }
    }

    /// Apply one named frame. A hand frame also drives its wrist.
    ///
    /// Returns the roles that were written.
    pub fn apply_frame(&self, frame: &JointFrame) -> Result<&'static [JointRole]> {
        let roles = joints::roles_for_name(&frame.name)?;
        {
            let allowed = self.allowed.read();
            let mut table = self.joints.write();
            for role in roles {
                if let Some(idx) = role.index() {
                    table[idx] = TrackedJoint {
                        role: *role,
                        is_tracked: frame.is_tracked && is_allowed(allowed.as_deref(), *role),
                        position: frame.position,
                        orientation: frame.orientation,
                    };
                }
            }
        }
        if frame.is_tracked {
            self.skeleton_present.store(true, Ordering::Relaxed);
        }
        Ok(roles)
    }

    /// Apply one role-keyed batch. Returns whether the batch held any pose.
    pub fn apply_poses(&self, poses: &[JointPose]) -> bool {
        {
            let allowed = self.allowed.read();
            let mut table = self.joints.write();
            for pose in poses {
                let Some(idx) = pose.role.index() else {
                    continue;
                };
                table[idx] = TrackedJoint {
                    role: pose.role,
                    is_tracked: is_allowed(allowed.as_deref(), pose.role),
                    position: pose.position,
                    orientation: pose.orientation(),
                };
            }
        }
        let any = !poses.is_empty();
        self.skeleton_present.store(any, Ordering::Relaxed);
        any
    }

    /// Limit tracking to `keep`, for the current table and every later
    /// sample. Returns how many roles were dropped.
    pub fn restrict_to(&self, keep: &[JointRole]) -> usize {
        *self.allowed.write() = Some(keep.to_vec());
        let mut table = self.joints.write();
        let mut changed = 0;
        for joint in table.iter_mut() {
            if joint.is_tracked && !keep.contains(&joint.role) {
                joint.is_tracked = false;
                changed += 1;
            }
        }
        changed
    }

    pub fn get(&self, role: JointRole) -> Option<TrackedJoint> {
        role.index().map(|idx| self.joints.read()[idx])
    }

    /// Copy of the whole table in role order.
    pub fn snapshot(&self) -> Vec<TrackedJoint> {
        self.joints.read().to_vec()
    }

    pub fn tracked_roles(&self) -> Vec<JointRole> {
        self.joints
            .read()
            .iter()
            .filter(|j| j.is_tracked)
            .map(|j| j.role)
            .collect()
    }

    /// Whether the most recent data described a body at all.
    pub fn skeleton_present(&self) -> bool {
        self.skeleton_present.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        *self.allowed.write() = None;
        *self.joints.write() = JointRole::ALL.map(TrackedJoint::idle);
        self.skeleton_present.store(false, Ordering::Relaxed);
    }
}

fn is_allowed(allowed: Option<&[JointRole]>, role: JointRole) -> bool {
    allowed.map_or(true, |keep| keep.contains(&role))
}
