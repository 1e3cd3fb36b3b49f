use serde::{Deserialize, Serialize};

use crate::errors::{CaramelError, ProtocolFault, TransportFaultKind};

/// Health of the tracking link as shown to the host UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    Success,
    ConnectionDead,
    ErrorProtocol,
    ErrorInit,
    ErrorPortsTaken,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::NotStarted
    }
}

impl SessionStatus {
    /// Numeric status code; 0 is healthy.
    pub fn code(self) -> i32 {
        match self {
            Self::NotStarted => -1,
            Self::Success => 0,
            Self::ConnectionDead => 10,
            Self::ErrorProtocol => 11,
            Self::ErrorInit => 12,
            Self::ErrorPortsTaken => 13,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::NotStarted),
            0 => Some(Self::Success),
            10 => Some(Self::ConnectionDead),
            11 => Some(Self::ErrorProtocol),
            12 => Some(Self::ErrorInit),
            13 => Some(Self::ErrorPortsTaken),
            _ => None,
        }
    }

    pub fn is_error(self) -> bool {
        matches!(self, Self::ErrorProtocol | Self::ErrorInit | Self::ErrorPortsTaken)
    }

    /// Status an error moves the link into, if it affects status at all.
    pub fn for_error(err: &CaramelError) -> Option<Self> {
        match err {
            CaramelError::TransportFault {
                kind: TransportFaultKind::PortsTaken,
                ..
            } => Some(Self::ErrorPortsTaken),
            CaramelError::TransportFault { .. } => Some(Self::ErrorInit),
            CaramelError::ProtocolFault(_) => Some(Self::ErrorProtocol),
            CaramelError::Silence(_) => Some(Self::ConnectionDead),
            _ => None,
        }
    }

    /// User-facing status text. `fault` fills the protocol-error template.
    pub fn message(self, fault: Option<&ProtocolFault>) -> String {
        match self {
            Self::NotStarted => {
                "Not started (Code -1)\nE_NOT_STARTED\n\nThe tracking service has not been started yet."
                    .to_string()
            }
            Self::Success => "Success! (Code 0)\nI_OK\n\nEverything's good!".to_string(),
            Self::ConnectionDead => {
                "Connection dead (Code 10)\nE_CONNECTION_DEAD\n\nNo data has been received from the device recently. Check that the app is running and connected."
                    .to_string()
            }
            Self::ErrorProtocol => {
                let (code, detail) = fault
                    .map(|f| (f.code.as_str(), f.detail.as_str()))
                    .unwrap_or(("UNKNOWN", "no detail"));
                format!(
                    "Protocol error (Code 11)\nE_PROTOCOL\n\nThe link reported status {code}: {detail}"
                )
            }
            Self::ErrorInit => {
                "Initialization failure (Code 12)\nE_INIT_FAILED\n\nThe tracking service could not be started."
                    .to_string()
            }
            Self::ErrorPortsTaken => {
                "Ports taken (Code 13)\nE_PORTS_TAKEN\n\nThe service port is already in use by another program."
                    .to_string()
            }
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::Success => "success",
            Self::ConnectionDead => "connection_dead",
            Self::ErrorProtocol => "error_protocol",
            Self::ErrorInit => "error_init",
            Self::ErrorPortsTaken => "error_ports_taken",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn codes_round_trip() {
        for status in [
            SessionStatus::NotStarted,
            SessionStatus::Success,
            SessionStatus::ConnectionDead,
            SessionStatus::ErrorProtocol,
            SessionStatus::ErrorInit,
            SessionStatus::ErrorPortsTaken,
        ] {
            assert_eq!(SessionStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(SessionStatus::from_code(42), None);
    }

    #[test]
    fn default_is_not_started() {
        assert_eq!(SessionStatus::default(), SessionStatus::NotStarted);
    }

    #[test]
    fn error_mapping() {
        let taken = CaramelError::TransportFault {
            kind: TransportFaultKind::PortsTaken,
            message: "in use".into(),
        };
        assert_eq!(SessionStatus::for_error(&taken), Some(SessionStatus::ErrorPortsTaken));

        let init = CaramelError::TransportFault {
            kind: TransportFaultKind::Init,
            message: "bad".into(),
        };
        assert_eq!(SessionStatus::for_error(&init), Some(SessionStatus::ErrorInit));

        let proto = CaramelError::protocol("INTERNAL", "boom");
        assert_eq!(SessionStatus::for_error(&proto), Some(SessionStatus::ErrorProtocol));

        let silence = CaramelError::Silence(Duration::from_secs(3));
        assert_eq!(SessionStatus::for_error(&silence), Some(SessionStatus::ConnectionDead));

        assert_eq!(SessionStatus::for_error(&CaramelError::UnknownJoint("x".into())), None);
    }

    #[test]
    fn protocol_message_interpolates_fault() {
        let fault = ProtocolFault::new("UNAVAILABLE", "socket reset");
        let msg = SessionStatus::ErrorProtocol.message(Some(&fault));
        assert!(msg.contains("UNAVAILABLE"));
        assert!(msg.contains("socket reset"));
        assert!(msg.contains("Code 11"));
    }

    #[test]
    fn messages_carry_their_code() {
        assert!(SessionStatus::Success.message(None).contains("Code 0"));
        assert!(SessionStatus::ConnectionDead.message(None).contains("Code 10"));
        assert!(SessionStatus::ErrorPortsTaken.message(None).contains("Code 13"));
        assert!(SessionStatus::ErrorProtocol.message(None).contains("UNKNOWN"));
    }

    #[test]
    fn only_fault_states_are_errors() {
        assert!(SessionStatus::ErrorInit.is_error());
        assert!(!SessionStatus::ConnectionDead.is_error());
        assert!(!SessionStatus::NotStarted.is_error());
    }
}
