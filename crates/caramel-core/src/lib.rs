//! Shared model for the Caramel tracking link: joint taxonomy, pose data,
//! wire messages, session status and the liveness watchdog.

pub mod errors;
pub mod ids;
pub mod joints;
pub mod pose;
pub mod protocol;
pub mod status;
pub mod watchdog;

pub use errors::{CaramelError, ProtocolFault, Result, TransportFaultKind};
pub use joints::JointRole;
pub use pose::{JointFrame, Quaternion, Vector3};
pub use status::SessionStatus;
pub use watchdog::{LivenessMonitor, SingleShotTimer, StatusListener};

/// Default port for the RPC service and the legacy discovery responder.
pub const DEFAULT_PORT: u16 = 8649;

/// DNS-SD service type advertised by the host.
pub const SERVICE_TYPE: &str = "_caramel._tcp.local.";
