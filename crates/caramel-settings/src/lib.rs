//! # caramel-settings
//!
//! Layered configuration for the Caramel host and client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`CaramelSettings::default()`]
//! 2. **User file**: `~/.caramel/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `CARAMEL_*` overrides
//!
//! ```no_run
//! let settings = caramel_settings::load_settings().unwrap_or_default();
//! println!("service port: {}", settings.host.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path, validate,
};
pub use types::*;
