//! # maas-settings
//!
//! Configuration for the MAAS websocket RPC client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`ClientSettings::default()`]
//! 2. **User file** — `~/.maas/ws-client.json` (deep-merged over defaults)
//! 3. **Environment variables** — `MAAS_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path, validate,
};
pub use types::*;
