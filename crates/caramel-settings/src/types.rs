//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section is `#[serde(default)]`, so
//! a partial file only overrides what it names.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use caramel_core::DEFAULT_PORT;

/// Root settings for both roles.
///
/// ```json
/// {
///   "host": { "port": 8649, "watchdogTimeoutMs": 3000 },
///   "client": { "address": "192.168.1.20" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaramelSettings {
    pub host: HostSettings,
    pub client: ClientSettings,
    pub discovery: DiscoverySettings,
    pub logging: LoggingSettings,
}

/// VR-host side: service binding, watchdog and advertisement.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostSettings {
    /// Bind address for the RPC service.
    pub bind: String,
    pub port: u16,
    /// Silence budget before the status drops to connection-dead.
    pub watchdog_timeout_ms: u64,
    /// Head frames per requested-joint update.
    pub subscription_threshold: u32,
    /// Register the DNS-SD service record.
    pub advertise: bool,
    /// Instance label used in the DNS-SD record.
    pub instance_name: String,
    /// Address published in the service record; detected when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertised_ip: Option<String>,
    /// Answer legacy UDP discovery queries on the service port.
    pub legacy_discovery: bool,
    /// Pause between legacy discovery answers.
    pub legacy_reply_delay_ms: u64,
    /// Grace period for in-flight streams on shutdown.
    pub shutdown_timeout_ms: u64,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            watchdog_timeout_ms: 3_000,
            subscription_threshold: 3,
            advertise: true,
            instance_name: "Caramel".to_string(),
            advertised_ip: None,
            legacy_discovery: false,
            legacy_reply_delay_ms: 500,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl HostSettings {
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn legacy_reply_delay(&self) -> Duration {
        Duration::from_millis(self.legacy_reply_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Capture-device side: stored endpoint and call budgets.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Manually entered host address; skips discovery when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub port: u16,
    /// Name sent with `Ping`.
    pub device_name: String,
    pub ping_timeout_ms: u64,
    /// Bound on each pose transmission attempt.
    pub transmit_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            address: None,
            port: DEFAULT_PORT,
            device_name: "caramel-client".to_string(),
            ping_timeout_ms: 1_000,
            transmit_timeout_ms: 10_000,
        }
    }
}

impl ClientSettings {
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn transmit_timeout(&self) -> Duration {
        Duration::from_millis(self.transmit_timeout_ms)
    }
}

/// Client browse budget.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoverySettings {
    pub cycles: u32,
    pub cycle_interval_ms: u64,
    /// Also send legacy UDP broadcast queries.
    pub legacy_broadcast: bool,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            cycles: 3,
            cycle_interval_ms: 1_500,
            legacy_broadcast: false,
        }
    }
}

impl DiscoverySettings {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
    /// Per-module overrides, e.g. `{"caramel_host": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
    pub metrics: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            module_levels: BTreeMap::new(),
            metrics: true,
        }
    }
}
