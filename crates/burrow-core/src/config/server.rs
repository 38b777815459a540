//! Gateway server configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_secs, option_duration_secs};

/// Default mount point for dynamically resolved routes
pub const DEFAULT_DYNAMIC_PREFIX: &str = "/proxy";

/// Bootstrap parameters for the tunnel gateway.
///
/// Read-only once the server has been constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to
    pub host: String,

    /// Port to bind the HTTP listener to
    pub port: u16,

    /// Seed for deterministic host key generation (random when absent)
    pub key_seed: Option<String>,

    /// Path to a JSON credential file
    pub auth_file: Option<PathBuf>,

    /// Inline `name:secret` credential
    pub auth: Option<String>,

    /// Fixed backend for traffic that is not tunnel or dynamic route traffic
    pub proxy: Option<String>,

    /// Allow `socks` channel targets
    pub socks5: bool,

    /// Allow remote (reverse) port forwarding
    pub reverse: bool,

    /// SSH keep-alive interval, zero disables
    #[serde(with = "duration_secs")]
    pub keepalive: Duration,

    /// TLS termination settings
    pub tls: TlsConfig,

    /// Host of the job-scheduling control service
    pub control_host: String,

    /// Control service port; when set the settings store is not consulted
    pub control_port: Option<String>,

    /// External credential verification endpoint
    pub auth_endpoint: Option<String>,

    /// Path prefix under which dynamic routes are served
    pub dynamic_prefix: String,

    /// Evict dynamic routes idle for longer than this
    #[serde(with = "option_duration_secs")]
    pub route_idle_timeout: Option<Duration>,

    /// How long open connections may drain after a graceful stop before
    /// they are closed
    #[serde(with = "duration_secs")]
    pub shutdown_timeout: Duration,

    /// Log every HTTP request
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            key_seed: None,
            auth_file: None,
            auth: None,
            proxy: None,
            socks5: false,
            reverse: false,
            keepalive: Duration::from_secs(25),
            tls: TlsConfig::default(),
            control_host: "127.0.0.1".to_string(),
            control_port: None,
            auth_endpoint: None,
            dynamic_prefix: DEFAULT_DYNAMIC_PREFIX.to_string(),
            route_idle_timeout: None,
            shutdown_timeout: Duration::from_secs(10),
            verbose: false,
        }
    }
}

/// TLS termination settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Server certificate chain (PEM)
    pub cert: Option<PathBuf>,
    /// Server private key (PEM)
    pub key: Option<PathBuf>,
    /// CA used to verify client certificates (PEM); enables mTLS
    pub ca: Option<PathBuf>,
}

impl TlsConfig {
    /// Whether TLS termination is configured
    pub fn is_enabled(&self) -> bool {
        self.cert.is_some() && self.key.is_some()
    }
}
