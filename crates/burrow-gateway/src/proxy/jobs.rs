//! Job-scheduling service client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};

use burrow_core::error::{BootstrapError, ResolutionError};
use burrow_core::traits::{JobResolver, ResolvedTarget};
use burrow_core::RoutingKey;

/// Timeout for one lookup against the job service
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves routing keys through the job service's HTTP API:
/// `GET /jobs/{user_id}/{job_id}/services/{service}`.
pub struct HttpJobResolver {
    client: reqwest::Client,
    base: Url,
}

impl HttpJobResolver {
    /// Create a client for the control service at `host:port`
    pub fn new(host: &str, port: &str) -> Result<Self, BootstrapError> {
        let base = Url::parse(&format!("http://{}:{}/", host, port.trim()))
            .map_err(|e| BootstrapError::Client(format!("Invalid control address: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .map_err(|e| BootstrapError::Client(e.to_string()))?;

        Ok(Self { client, base })
    }

    /// Base URL of the control service
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Lookup URL for a routing key
    pub fn lookup_url(&self, key: &RoutingKey) -> Result<Url, ResolutionError> {
        self.base
            .join(&format!(
                "jobs/{}/{}/services/{}",
                key.user_id, key.job_id, key.service
            ))
            .map_err(|e| ResolutionError::Rpc(e.to_string()))
    }
}

#[async_trait]
impl JobResolver for HttpJobResolver {
    async fn resolve(&self, key: &RoutingKey) -> Result<ResolvedTarget, ResolutionError> {
        let url = self.lookup_url(key)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResolutionError::Rpc(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => {
                return Err(ResolutionError::EmptyTarget(key.to_string()));
            }
            status if !status.is_success() => {
                return Err(ResolutionError::Rpc(format!(
                    "job service returned {}",
                    status
                )));
            }
            _ => {}
        }

        response
            .json::<ResolvedTarget>()
            .await
            .map_err(|e| ResolutionError::Rpc(format!("invalid job service response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_url() {
        let resolver = HttpJobResolver::new("127.0.0.1", "50051").unwrap();
        let url = resolver
            .lookup_url(&RoutingKey::new("jupyter", 12, 345))
            .unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:50051/jobs/12/345/services/jupyter");
    }

    #[test]
    fn test_invalid_port_is_bootstrap_error() {
        assert!(HttpJobResolver::new("127.0.0.1", "not-a-port").is_err());
    }
}
