//! # huddle-settings
//!
//! Configuration with layered sources:
//! 1. **Compiled defaults**: [`HuddleSettings::default()`]
//! 2. **User file**: `~/.huddle/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `HUDDLE_*` and `JWT_SECRET` (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, huddle_home, load_settings, load_settings_from_path,
    settings_path, validate,
};
pub use types::*;
