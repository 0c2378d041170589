//! Configuration file loading.
//!
//! The configuration types live in [`rd_core::config`]; this module finds,
//! reads and validates the TOML file.

pub use rd_core::config::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Locations searched when no `--config` is given, in order.
const DEFAULT_PATHS: &[&str] = &[
    "./renditiond.toml",
    "~/.config/renditiond/config.toml",
    "/etc/renditiond/config.toml",
];

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    for path_str in DEFAULT_PATHS {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::info!("Loading config from {:?}", path);
            return load_config(path);
        }
    }

    tracing::debug!("No config file found, using defaults");
    Ok(Config::default())
}

/// Validate configuration, logging non-fatal warnings.
fn validate_config(config: &Config) -> Result<()> {
    config
        .validate()
        .context("Invalid configuration")?;

    for warning in config.warnings() {
        tracing::warn!("{warning}");
    }

    Ok(())
}
