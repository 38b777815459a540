//! Configuration management for burrow

mod server;
pub mod serde_utils;

pub use server::{ServerConfig, TlsConfig, DEFAULT_DYNAMIC_PREFIX};

use crate::error::ConfigError;
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Read an integer tunable from the environment, falling back to `default`
/// when the variable is unset or unparsable.
pub fn env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring non-numeric {}={:?}", name, value);
            default
        }),
        Err(_) => default,
    }
}
