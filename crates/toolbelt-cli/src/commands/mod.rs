//! CLI command implementations.

pub mod config;
pub mod gateway;

pub use config::run_config;
pub use gateway::run_gateway;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use toolbelt_core::Config;

/// Path of the configuration file in use.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(Config::default_path, Path::to_path_buf)
}

/// Load the configuration file, or defaults when it does not exist, then
/// apply environment overrides.
///
/// An explicitly named file must exist.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let config = match explicit {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_default().context("Failed to load default config")?,
    };
    tracing::debug!("Loaded configuration from {}", config_path(explicit).display());
    Ok(config.with_env_overrides())
}
