//! VR-host side of the Caramel tracking link.
//!
//! [`HostDriver`] runs the WebSocket RPC service the capture client talks to,
//! keeps the per-role joint table the host reads each frame, watches the link
//! with a [`caramel_core::LivenessMonitor`] and makes itself findable over
//! DNS-SD (plus an optional legacy UDP responder).

pub mod advertise;
pub mod driver;
pub mod handlers;
pub mod registry;
pub mod rpc;
pub mod server;
pub mod shutdown;
pub mod stream;
pub mod subscription;
pub mod tracker;

pub use driver::{DriverState, HealthReport, HostDriver, TrackingSnapshot};
pub use server::{ServerConfig, ServerHandle};
pub use subscription::{AllJoints, JointEnablement, StaticEnablement};
pub use tracker::{JointTracker, TrackedJoint};
