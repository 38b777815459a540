//! Credential verification trait

use async_trait::async_trait;
use std::fmt;

use crate::error::AuthError;
use crate::types::SessionId;

/// Credentials presented during an SSH password handshake
#[derive(Clone)]
pub struct Credentials {
    /// Claimed user name
    pub user: String,
    /// Presented secret
    pub secret: String,
    /// Session the handshake belongs to
    pub session_id: SessionId,
}

// Keep the secret out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// External provider that decides whether credentials are valid
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Verify the credentials. `Ok(())` means the provider accepted them.
    async fn verify(&self, credentials: &Credentials) -> Result<(), AuthError>;
}
