//! Credential verification providers

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Serialize;

use burrow_core::error::{AuthError, BootstrapError};
use burrow_core::traits::{CredentialVerifier, Credentials};

use super::users::UserIndex;

/// Timeout for one verification request
const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Verifies credentials against the local user registry (exact name and
/// secret match).
pub struct RegistryVerifier {
    users: Arc<UserIndex>,
}

impl RegistryVerifier {
    pub fn new(users: Arc<UserIndex>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl CredentialVerifier for RegistryVerifier {
    async fn verify(&self, credentials: &Credentials) -> Result<(), AuthError> {
        match self.users.get(&credentials.user) {
            Some(user) if user.secret == credentials.secret => Ok(()),
            _ => Err(AuthError::Rejected(credentials.user.clone())),
        }
    }
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    user: &'a str,
    secret: &'a str,
    session_id: &'a str,
}

/// Verifies credentials by POSTing them to an external HTTP endpoint.
///
/// Any 2xx accepts, 401/403 reject, every other outcome is a provider error.
pub struct HttpCredentialVerifier {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpCredentialVerifier {
    pub fn new(endpoint: &str) -> Result<Self, BootstrapError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| BootstrapError::Client(format!("Invalid auth endpoint {}: {}", endpoint, e)))?;
        let client = reqwest::Client::builder()
            .timeout(VERIFY_TIMEOUT)
            .build()
            .map_err(|e| BootstrapError::Client(e.to_string()))?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl CredentialVerifier for HttpCredentialVerifier {
    async fn verify(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let body = VerifyRequest {
            user: &credentials.user,
            secret: &credentials.secret,
            session_id: credentials.session_id.as_str(),
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Provider(e.without_url().to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(AuthError::Rejected(credentials.user.clone()))
            }
            status => Err(AuthError::Provider(format!(
                "unexpected status {} from credential endpoint",
                status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::User;
    use burrow_core::SessionId;

    fn credentials(user: &str, secret: &str) -> Credentials {
        Credentials {
            user: user.to_string(),
            secret: secret.to_string(),
            session_id: SessionId::new("s"),
        }
    }

    #[tokio::test]
    async fn test_registry_verifier() {
        let users = Arc::new(UserIndex::new());
        users.add(User::allow_all("alice", "pw"));
        let verifier = RegistryVerifier::new(users);

        assert!(verifier.verify(&credentials("alice", "pw")).await.is_ok());
        assert!(verifier.verify(&credentials("alice", "nope")).await.is_err());
        assert!(verifier.verify(&credentials("bob", "pw")).await.is_err());
    }

    #[test]
    fn test_http_verifier_rejects_bad_endpoint() {
        assert!(HttpCredentialVerifier::new("not a url").is_err());
        assert!(HttpCredentialVerifier::new("http://auth.internal/verify").is_ok());
    }
}
