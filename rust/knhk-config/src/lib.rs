//! Configuration loading for the resource manager daemon.
//!
//! Hierarchy: environment variables override the TOML config file, which
//! overrides built-in defaults. See `schema::RtrmConfig` for the sections.

pub mod config;
pub mod env;
pub mod schema;

pub use config::{get_config_file_path, load_config, load_from_file, validate_config};
pub use env::{apply_env_overrides, load_env_overlay};
pub use schema::{ConfigError, RtrmConfig};
