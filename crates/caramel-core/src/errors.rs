use std::time::Duration;

/// Which part of transport setup failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportFaultKind {
    /// The listening port is already bound by someone else.
    PortsTaken,
    /// Any other setup failure (bad bind address, socket error).
    Init,
}

/// An RPC-level failure: a status code plus a human-readable detail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolFault {
    pub code: String,
    pub detail: String,
}

impl ProtocolFault {
    pub fn new(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for ProtocolFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)
    }
}

/// Error taxonomy for the tracking link.
///
/// `UnknownJoint` is recoverable (skip the frame), `Silence` recovers on the
/// next contact, transport faults hold until the driver is reinitialized.
#[derive(Clone, Debug, thiserror::Error)]
pub enum CaramelError {
    #[error("unknown joint: {0}")]
    UnknownJoint(String),

    #[error("transport fault ({kind:?}): {message}")]
    TransportFault {
        kind: TransportFaultKind,
        message: String,
    },

    #[error("protocol fault {0}")]
    ProtocolFault(ProtocolFault),

    #[error("no traffic for {0:?}")]
    Silence(Duration),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("no host found on the local network")]
    DiscoveryNotFound,

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("settings error: {0}")]
    Settings(String),
}

impl CaramelError {
    pub fn protocol(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ProtocolFault(ProtocolFault::new(code, detail))
    }

    /// Classify a bind/listen failure.
    pub fn from_bind(err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::AddrInUse => TransportFaultKind::PortsTaken,
            _ => TransportFaultKind::Init,
        };
        Self::TransportFault {
            kind,
            message: err.to_string(),
        }
    }

    /// Errors the caller should log and move past without touching status.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnknownJoint(_) | Self::Silence(_))
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::UnknownJoint(_) => "unknown_joint",
            Self::TransportFault {
                kind: TransportFaultKind::PortsTaken,
                ..
            } => "ports_taken",
            Self::TransportFault { .. } => "transport_init",
            Self::ProtocolFault(_) => "protocol",
            Self::Silence(_) => "silence",
            Self::InvalidAddress(_) => "invalid_address",
            Self::DiscoveryNotFound => "discovery_not_found",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::ConnectionClosed => "connection_closed",
            Self::Settings(_) => "settings",
        }
    }
}

impl From<serde_json::Error> for CaramelError {
    fn from(e: serde_json::Error) -> Self {
        Self::protocol("INVALID_MESSAGE", e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CaramelError>;
