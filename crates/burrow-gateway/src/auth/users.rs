//! User registry
//!
//! Holds the set of users allowed to open tunnels. Reads happen on every
//! handshake; writes are rare administrative operations, so the index sits
//! behind a single `RwLock` and `reset` swaps the whole map at once.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};

use regex::Regex;

use burrow_core::error::ConfigError;

/// Pattern that matches every address
pub const ALLOW_ALL_PATTERN: &str = "^.*$";

/// A user allowed to open tunnels
#[derive(Clone)]
pub struct User {
    /// Unique user name
    pub name: String,
    /// Shared secret
    pub secret: String,
    /// Remote addresses this user may reach
    pub addrs: Vec<Regex>,
}

impl User {
    /// Create a user, compiling each address pattern.
    ///
    /// Patterns are anchored with `^`/`$` when they are not already. An empty
    /// pattern list grants access to every address.
    pub fn new(
        name: impl Into<String>,
        secret: impl Into<String>,
        patterns: &[impl AsRef<str>],
    ) -> Result<Self, ConfigError> {
        let addrs = if patterns.is_empty() {
            vec![allow_all()]
        } else {
            patterns
                .iter()
                .map(|p| compile_pattern(p.as_ref()))
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Self {
            name: name.into(),
            secret: secret.into(),
            addrs,
        })
    }

    /// Create a user that may reach any address
    pub fn allow_all(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secret: secret.into(),
            addrs: vec![allow_all()],
        }
    }

    /// Whether this user may reach `addr`
    pub fn has_access(&self, addr: &str) -> bool {
        self.addrs.iter().any(|re| re.is_match(addr))
    }

    /// Normalized address patterns
    pub fn patterns(&self) -> Vec<&str> {
        self.addrs.iter().map(|re| re.as_str()).collect()
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("name", &self.name)
            .field("addrs", &self.patterns())
            .finish_non_exhaustive()
    }
}

fn allow_all() -> Regex {
    // Constant pattern; compilation cannot fail.
    Regex::new(ALLOW_ALL_PATTERN).unwrap_or_else(|_| unreachable!())
}

/// Anchor and compile one address pattern
fn compile_pattern(pattern: &str) -> Result<Regex, ConfigError> {
    let mut normalized = pattern.trim().to_string();
    if !normalized.starts_with('^') {
        normalized.insert(0, '^');
    }
    if !normalized.ends_with('$') {
        normalized.push('$');
    }

    Regex::new(&normalized).map_err(|e| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Split an inline `name:secret` credential.
///
/// Returns `None` when there is no separator or the name is empty.
pub fn parse_auth(auth: &str) -> Option<(String, String)> {
    let (name, secret) = auth.split_once(':')?;
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), secret.to_string()))
}

/// Parse a credential file: a JSON object mapping `"name:secret"` to a list
/// of address patterns.
pub fn parse_users(content: &str) -> Result<Vec<User>, ConfigError> {
    let raw: HashMap<String, Vec<String>> = serde_json::from_str(content)?;

    let mut users = Vec::with_capacity(raw.len());
    for (auth, patterns) in raw {
        let (name, secret) = parse_auth(&auth)
            .ok_or_else(|| ConfigError::Invalid(format!("Invalid user entry {:?}", name_of(&auth))))?;
        users.push(User::new(name, secret, &patterns)?);
    }
    Ok(users)
}

// Entry keys carry secrets; only ever report the part before the separator.
fn name_of(auth: &str) -> &str {
    auth.split(':').next().unwrap_or_default()
}

/// Index of users by name
#[derive(Debug, Default)]
pub struct UserIndex {
    users: RwLock<HashMap<String, Arc<User>>>,
}

impl UserIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Import all users from a credential file, replacing same-named entries
    pub fn load_from_file(&self, path: &Path) -> Result<(), ConfigError> {
        tracing::info!("Loading users from {:?}", path);

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Invalid(format!("Failed to read {:?}: {}", path, e)))?;

        let users = parse_users(&content)?;
        let count = users.len();
        {
            let mut map = self.write();
            for user in users {
                map.insert(user.name.clone(), Arc::new(user));
            }
        }

        tracing::info!("Loaded {} users from {:?}", count, path);
        Ok(())
    }

    /// Insert or replace a user
    pub fn add(&self, user: User) {
        tracing::debug!("Adding user {}", user.name);
        self.write().insert(user.name.clone(), Arc::new(user));
    }

    /// Compile the patterns and insert the user.
    ///
    /// Nothing is committed when any pattern fails to compile.
    pub fn add_user(
        &self,
        name: &str,
        secret: &str,
        patterns: &[impl AsRef<str>],
    ) -> Result<(), ConfigError> {
        let user = User::new(name, secret, patterns)?;
        self.add(user);
        Ok(())
    }

    /// Remove a user; absent names are ignored
    pub fn delete(&self, name: &str) {
        if self.write().remove(name).is_some() {
            tracing::debug!("Deleted user {}", name);
        }
    }

    /// Replace every user with `users` in one step (empty clears the index)
    pub fn reset(&self, users: Vec<User>) {
        let map = users
            .into_iter()
            .map(|u| (u.name.clone(), Arc::new(u)))
            .collect::<HashMap<_, _>>();
        tracing::debug!("Resetting users ({} entries)", map.len());
        *self.write() = map;
    }

    /// Look up a user by name
    pub fn get(&self, name: &str) -> Option<Arc<User>> {
        self.read().get(name).cloned()
    }

    /// Number of users
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Sorted user names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<User>>> {
        self.users.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<User>>> {
        self.users.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
