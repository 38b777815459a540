//! Job resolver trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ResolutionError;
use crate::types::RoutingKey;

/// Backend target returned by the job-scheduling service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    /// Backend URL (scheme and host at minimum)
    pub target: String,
    /// Kind of proxy the service expects (e.g. `http`, `websocket`)
    #[serde(default)]
    pub proxy_type: String,
}

/// Client for the external job-scheduling service
#[async_trait]
pub trait JobResolver: Send + Sync {
    /// Look up the current backend target for a routing key
    async fn resolve(&self, key: &RoutingKey) -> Result<ResolvedTarget, ResolutionError>;
}
