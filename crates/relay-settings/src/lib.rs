//! # relay-settings
//!
//! Configuration for the event relay, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `~/.relay/settings.json` or an explicit path
//! 3. **Environment variables**: `RELAY_*` overrides (highest priority)
//!
//! The result is an immutable snapshot; the relay never writes settings back.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings_from_path, settings_path};
pub use types::{RelaySettings, ServerSettings};
