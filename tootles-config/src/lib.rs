//! Configuration loading for the tootles media engine.
//!
//! Values are layered as defaults, then a TOML file, then `TOOTLES_MEDIA_*`
//! environment variables (optionally seeded from a `.env` file). The result
//! is a validated [`tootles_media::MediaConfig`] plus non-fatal warnings.

pub mod loader;
pub mod sources;
pub mod validation;

pub use loader::{
    ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions, ConfigMetadata, to_toml,
};
pub use sources::{EnvConfig, FileConfig, SizeValue};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings, apply_guard_rails};
