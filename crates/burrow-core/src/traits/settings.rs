//! Settings provider trait

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::SettingsError;

/// Name of the deployment setting holding the control service port
pub const CONTROL_PORT_SETTING: &str = "DCMASTER_PORT";

/// Resolves named deployment settings from some external store
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// Resolve a single setting by name.
    ///
    /// Missing or empty values are reported as [`SettingsError::NotFound`].
    async fn resolve(&self, key: &str) -> Result<String, SettingsError>;
}

/// In-memory settings, used for static overrides and tests
#[derive(Debug, Clone, Default)]
pub struct StaticSettingsProvider {
    values: HashMap<String, String>,
}

impl StaticSettingsProvider {
    /// Create an empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a setting
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl SettingsProvider for StaticSettingsProvider {
    async fn resolve(&self, key: &str) -> Result<String, SettingsError> {
        self.values
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| SettingsError::NotFound(key.to_string()))
    }
}
