//! Handshake authentication decision
//!
//! Bridges the password presented in the SSH handshake to an authorization
//! decision:
//!
//! 1. With no registered users every handshake is accepted and no session
//!    is recorded (authentication is delegated upstream).
//! 2. Otherwise the credential provider must accept the credentials.
//! 3. The catch-all entry (`all`) must then exist with the secret `all`;
//!    any other catch-all configuration rejects the login even though the
//!    provider accepted it.
//! 4. Accepted handshakes are recorded in the session registry under the
//!    catch-all user.

use std::sync::Arc;

use burrow_core::error::AuthError;
use burrow_core::traits::{CredentialVerifier, Credentials};

use super::users::{User, UserIndex};
use crate::session::SessionRegistry;

/// Name of the catch-all user entry
pub const CATCH_ALL_USER: &str = "all";

/// Secret the catch-all entry must carry for logins to be accepted
pub const CATCH_ALL_SECRET: &str = "all";

/// Result of a successful handshake
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    /// No users configured; accepted without an identity
    Open,
    /// Accepted and recorded under this user
    Authenticated(Arc<User>),
}

impl AuthOutcome {
    /// The resolved user, if any
    pub fn user(&self) -> Option<&Arc<User>> {
        match self {
            AuthOutcome::Open => None,
            AuthOutcome::Authenticated(user) => Some(user),
        }
    }
}

/// Decides whether an inbound handshake may proceed
#[derive(Clone)]
pub struct AuthGateway {
    users: Arc<UserIndex>,
    sessions: Arc<SessionRegistry>,
    verifier: Arc<dyn CredentialVerifier>,
}

impl AuthGateway {
    /// Create a gateway over the given registries and provider
    pub fn new(
        users: Arc<UserIndex>,
        sessions: Arc<SessionRegistry>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self {
            users,
            sessions,
            verifier,
        }
    }

    /// Authenticate one handshake attempt
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<AuthOutcome, AuthError> {
        if self.users.is_empty() {
            return Ok(AuthOutcome::Open);
        }

        let name = credentials.user.as_str();

        if let Err(e) = self.verifier.verify(credentials).await {
            tracing::info!("Login failed for user: {} ({})", name, e);
            return Err(e);
        }

        match self.users.get(CATCH_ALL_USER) {
            Some(user) if user.secret == CATCH_ALL_SECRET => {
                tracing::info!("Login success for user: {}", name);
                self.sessions
                    .record(credentials.session_id.clone(), Arc::clone(&user));
                Ok(AuthOutcome::Authenticated(user))
            }
            _ => {
                tracing::info!("Login failed for user: {}", name);
                Err(AuthError::Rejected(name.to_string()))
            }
        }
    }
}
