//! Capture-device side of the Caramel tracking link.
//!
//! The [`SessionManager`] finds or is given a host, opens the control and
//! stream channels and sends per-tick joint frames, filtered down to the
//! joints the host last asked for.

pub mod channel;
pub mod discovery;
pub mod requested;
pub mod session;
pub mod transmitter;

pub use channel::{ControlChannel, PoseBatchChannel, PoseStream};
pub use discovery::{BroadcastBrowser, Browser, Discovery, MdnsBrowser, ServiceRecord};
pub use requested::RequestedSet;
pub use session::{validate_endpoint, ConnectOutcome, Session, SessionManager};
pub use transmitter::{PoseTransmitter, DEFAULT_TRANSMIT_TIMEOUT};
