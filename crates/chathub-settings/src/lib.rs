//! # chathub-settings
//!
//! Configuration for the chat hub, loaded from three layers (in priority
//! order):
//! 1. **Compiled defaults**: [`ChatHubSettings::default()`]
//! 2. **Settings file**: JSON at `$CONFIG_PATH`, or `~/.chathub/settings.json`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `CHATHUB_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
