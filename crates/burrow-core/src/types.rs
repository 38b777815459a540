//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a generated session identifier in bytes (before hex encoding)
const SESSION_ID_BYTES: usize = 16;

/// Opaque identifier for one authenticated tunnel connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create a session ID from an existing string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random session ID
    pub fn generate() -> Self {
        use rand::Rng;
        let mut bytes = [0u8; SESSION_ID_BYTES];
        rand::thread_rng().fill(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one logical backend route: a service exposed by a user's job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingKey {
    /// Service prefix (e.g. `jupyter`, `tensorboard`)
    pub service: String,
    /// Owning user
    pub user_id: i64,
    /// Owning job
    pub job_id: i64,
}

impl RoutingKey {
    /// Create a routing key
    pub fn new(service: impl Into<String>, user_id: i64, job_id: i64) -> Self {
        Self {
            service: service.into(),
            user_id,
            job_id,
        }
    }

    /// Derive a routing key from a request path mounted under `prefix`.
    ///
    /// Paths look like `{prefix}/{service}/{user_id}/{job_id}[/rest]`.
    /// Returns `None` for anything that does not match that shape.
    pub fn from_path(prefix: &str, path: &str) -> Option<Self> {
        let prefix = prefix.trim_end_matches('/');
        let rest = path.strip_prefix(prefix)?;
        let rest = rest.strip_prefix('/')?;

        let mut parts = rest.splitn(4, '/');
        let service = parts.next().filter(|s| !s.is_empty())?;
        let user_id = parts.next()?.parse().ok()?;
        let job_id = parts.next()?.parse().ok()?;

        Some(Self::new(service, user_id, job_id))
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.service, self.user_id, self.job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_generate_is_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_eq!(a.as_str().len(), SESSION_ID_BYTES * 2);
        assert_ne!(a, b);
    }

    #[test]
    fn test_routing_key_from_path() {
        let key = RoutingKey::from_path("/proxy", "/proxy/jupyter/12/345/lab/tree").unwrap();
        assert_eq!(key, RoutingKey::new("jupyter", 12, 345));

        let key = RoutingKey::from_path("/proxy/", "/proxy/tb/1/2").unwrap();
        assert_eq!(key.to_string(), "tb:1:2");
    }

    #[test]
    fn test_routing_key_rejects_malformed_paths() {
        assert!(RoutingKey::from_path("/proxy", "/other/jupyter/1/2").is_none());
        assert!(RoutingKey::from_path("/proxy", "/proxyjupyter/1/2").is_none());
        assert!(RoutingKey::from_path("/proxy", "/proxy/jupyter/abc/2").is_none());
        assert!(RoutingKey::from_path("/proxy", "/proxy/jupyter/1").is_none());
        assert!(RoutingKey::from_path("/proxy", "/proxy//1/2").is_none());
    }
}
