//! Session registry implementation

use dashmap::DashMap;
use std::sync::Arc;

use burrow_core::SessionId;

use crate::auth::User;

/// Maps live tunnel sessions to the user that authenticated them.
///
/// Entries are created on successful authentication and removed when the
/// owning connection closes.
pub struct SessionRegistry {
    /// Sessions indexed by session ID
    sessions: DashMap<SessionId, Arc<User>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Record an authenticated session
    pub fn record(&self, id: SessionId, user: Arc<User>) {
        tracing::debug!("Recording session {} for {}", id, user.name);
        self.sessions.insert(id, user);
    }

    /// Remove a session, returning its user if it was present
    pub fn end(&self, id: &SessionId) -> Option<Arc<User>> {
        let removed = self.sessions.remove(id).map(|(_, user)| user);
        if let Some(user) = &removed {
            tracing::debug!("Ended session {} for {}", id, user.name);
        }
        removed
    }

    /// Get the user for a session
    pub fn get(&self, id: &SessionId) -> Option<Arc<User>> {
        self.sessions.get(id).map(|r| Arc::clone(&r))
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_get_end() {
        let registry = SessionRegistry::new();
        let id = SessionId::new("sess-1");
        registry.record(id.clone(), Arc::new(User::allow_all("all", "all")));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&id).unwrap().name, "all");

        let ended = registry.end(&id).unwrap();
        assert_eq!(ended.name, "all");
        assert!(registry.is_empty());
        assert!(registry.end(&id).is_none());
    }
}
