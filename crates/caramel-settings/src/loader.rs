//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`CaramelSettings::default()`]
//! 2. If `~/.caramel/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `CARAMEL_*` environment overrides
//! 4. Validate
//!
//! Command-line flags are applied by the binary on top of the result.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::CaramelSettings;

pub const ENV_SETTINGS_PATH: &str = "CARAMEL_SETTINGS";
pub const ENV_PORT: &str = "CARAMEL_PORT";
pub const ENV_BIND: &str = "CARAMEL_BIND";
pub const ENV_ADDRESS: &str = "CARAMEL_ADDRESS";
pub const ENV_WATCHDOG_MS: &str = "CARAMEL_WATCHDOG_MS";
pub const ENV_SUBSCRIPTION_THRESHOLD: &str = "CARAMEL_SUBSCRIPTION_THRESHOLD";
pub const ENV_LEGACY_DISCOVERY: &str = "CARAMEL_LEGACY_DISCOVERY";
pub const ENV_LOG_LEVEL: &str = "CARAMEL_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "CARAMEL_LOG_FORMAT";

/// Path to the settings file: `$CARAMEL_SETTINGS`, else `~/.caramel/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(p) = std::env::var(ENV_SETTINGS_PATH).ok().filter(|v| !v.is_empty()) {
        return PathBuf::from(p);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".caramel").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<CaramelSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; unreadable or malformed JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<CaramelSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<CaramelSettings> {
    let defaults = serde_json::to_value(CaramelSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, arrays and primitives are replaced, and nulls in
/// `source` leave the target untouched.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `CARAMEL_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut CaramelSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup. Invalid values are logged and
/// ignored.
pub fn apply_overrides<F>(settings: &mut CaramelSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read(ENV_PORT) {
        match parse_u16_range(&v, 1, 65535) {
            Some(port) => {
                settings.host.port = port;
                settings.client.port = port;
            }
            None => warn!(key = ENV_PORT, value = %v, "invalid port env var, ignoring"),
        }
    }
    if let Some(v) = read(ENV_BIND) {
        settings.host.bind = v;
    }
    if let Some(v) = read(ENV_ADDRESS) {
        settings.client.address = Some(v);
    }
    if let Some(v) = read(ENV_WATCHDOG_MS) {
        match parse_u64_range(&v, 100, 600_000) {
            Some(ms) => settings.host.watchdog_timeout_ms = ms,
            None => warn!(key = ENV_WATCHDOG_MS, value = %v, "invalid u64 env var, ignoring"),
        }
    }
    if let Some(v) = read(ENV_SUBSCRIPTION_THRESHOLD) {
        match parse_u32_range(&v, 1, 1_000) {
            Some(n) => settings.host.subscription_threshold = n,
            None => warn!(
                key = ENV_SUBSCRIPTION_THRESHOLD,
                value = %v,
                "invalid u32 env var, ignoring"
            ),
        }
    }
    if let Some(v) = read(ENV_LEGACY_DISCOVERY) {
        match parse_bool(&v) {
            Some(on) => {
                settings.host.legacy_discovery = on;
                settings.discovery.legacy_broadcast = on;
            }
            None => warn!(key = ENV_LEGACY_DISCOVERY, value = %v, "invalid boolean env var, ignoring"),
        }
    }
    if let Some(v) = read(ENV_LOG_LEVEL) {
        settings.logging.level = v;
    }
    if let Some(v) = read(ENV_LOG_FORMAT) {
        settings.logging.format = v;
    }
}

/// Reject values no component can run with.
pub fn validate(settings: &CaramelSettings) -> Result<()> {
    if settings.host.port == 0 {
        return Err(SettingsError::InvalidValue("host.port must be non-zero".into()));
    }
    if settings.client.port == 0 {
        return Err(SettingsError::InvalidValue("client.port must be non-zero".into()));
    }
    if settings.host.watchdog_timeout_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "host.watchdogTimeoutMs must be positive".into(),
        ));
    }
    if settings.host.subscription_threshold == 0 {
        return Err(SettingsError::InvalidValue(
            "host.subscriptionThreshold must be at least 1".into(),
        ));
    }
    if settings.discovery.cycles == 0 {
        return Err(SettingsError::InvalidValue(
            "discovery.cycles must be at least 1".into(),
        ));
    }
    Ok(())
}

// ── Pure parsing functions ──

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    // ── deep_merge ──

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"host": {"port": 8649, "bind": "0.0.0.0"}});
        let source = serde_json::json!({"host": {"port": 9000}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["host"]["port"], 9000);
        assert_eq!(merged["host"]["bind"], "0.0.0.0");
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replaces() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(
            serde_json::json!({"a": {"nested": true}}),
            serde_json::json!({"a": 42}),
        );
        assert_eq!(merged["a"], 42);
    }

    // ── file loading ──

    #[test]
    fn missing_file_returns_defaults() {
        let settings = read_settings_file(Path::new("/nonexistent/caramel.json")).unwrap();
        assert_eq!(settings.host.port, 8649);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"host": {"watchdogTimeoutMs": 5000, "legacyDiscovery": true}, "logging": {"moduleLevels": {"caramel_host": "debug"}}}"#,
        )
        .unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.host.watchdog_timeout_ms, 5000);
        assert!(settings.host.legacy_discovery);
        assert_eq!(settings.host.port, 8649);
        assert_eq!(
            settings.logging.module_levels.get("caramel_host").map(String::as_str),
            Some("debug")
        );
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            read_settings_file(&path),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn wrong_type_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"host": {"port": "eighty"}}"#).unwrap();
        assert!(read_settings_file(&path).is_err());
    }

    #[test]
    fn zero_port_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"host": {"port": 0}}"#).unwrap();
        let settings = read_settings_file(&path).unwrap();
        assert!(matches!(
            validate(&settings),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    // ── overrides ──

    #[test]
    fn env_overrides_apply() {
        let mut settings = CaramelSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                (ENV_PORT, "9100"),
                (ENV_BIND, "127.0.0.1"),
                (ENV_ADDRESS, "192.168.1.44"),
                (ENV_WATCHDOG_MS, "1500"),
                (ENV_SUBSCRIPTION_THRESHOLD, "5"),
                (ENV_LEGACY_DISCOVERY, "yes"),
                (ENV_LOG_LEVEL, "debug"),
                (ENV_LOG_FORMAT, "json"),
            ]),
        );
        assert_eq!(settings.host.port, 9100);
        assert_eq!(settings.client.port, 9100);
        assert_eq!(settings.host.bind, "127.0.0.1");
        assert_eq!(settings.client.address.as_deref(), Some("192.168.1.44"));
        assert_eq!(settings.host.watchdog_timeout_ms, 1500);
        assert_eq!(settings.host.subscription_threshold, 5);
        assert!(settings.host.legacy_discovery);
        assert!(settings.discovery.legacy_broadcast);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, "json");
    }

    #[test]
    fn out_of_range_overrides_are_ignored() {
        let mut settings = CaramelSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                (ENV_PORT, "0"),
                (ENV_WATCHDOG_MS, "5"),
                (ENV_SUBSCRIPTION_THRESHOLD, "zero"),
                (ENV_LEGACY_DISCOVERY, "maybe"),
                (ENV_BIND, ""),
            ]),
        );
        let defaults = CaramelSettings::default();
        assert_eq!(settings.host.port, defaults.host.port);
        assert_eq!(settings.host.watchdog_timeout_ms, defaults.host.watchdog_timeout_ms);
        assert_eq!(settings.host.subscription_threshold, 3);
        assert!(!settings.host.legacy_discovery);
        assert_eq!(settings.host.bind, "0.0.0.0");
    }

    // ── parsing ──

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8649", 1, 65535), Some(8649));
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u32_range("3", 1, 10), Some(3));
        assert_eq!(parse_u32_range("0", 1, 10), None);
        assert_eq!(parse_u64_range("3000", 100, 600_000), Some(3000));
        assert_eq!(parse_u64_range("-1", 0, 10), None);
    }
}
