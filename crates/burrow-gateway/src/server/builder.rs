//! Gateway construction
//!
//! Everything fallible happens here, in a fixed order: users, identity,
//! static proxy, control port lookup, collaborator clients. The first
//! failure aborts construction and nothing is returned.

use std::sync::Arc;

use russh::server::Config as SshConfig;
use russh::{MethodSet, SshId};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use burrow_core::config::{env_usize, ServerConfig};
use burrow_core::error::BootstrapError;
use burrow_core::traits::{
    CredentialVerifier, JobResolver, SettingsProvider, StaticSettingsProvider,
    CONTROL_PORT_SETTING,
};

use super::identity::ServerIdentity;
use super::lifecycle::TunnelServer;
use super::transport::{BUFFER_SIZE_ENV, PROTOCOL_VERSION};
use crate::auth::{parse_auth, AuthGateway, HttpCredentialVerifier, RegistryVerifier, User, UserIndex};
use crate::proxy::{parse_target, DynamicProxyRegistry, HttpJobResolver, ReverseProxy, TargetError};
use crate::session::SessionRegistry;
use crate::settings::PostgresSettingsProvider;
use crate::state::GatewayState;

/// Builder for [`TunnelServer`].
///
/// Collaborators left unset fall back to the defaults derived from the
/// configuration: the Postgres settings store (or the configured
/// `control_port`), the HTTP job resolver, and the registry or HTTP
/// credential verifier.
pub struct TunnelServerBuilder {
    config: ServerConfig,
    settings: Option<Arc<dyn SettingsProvider>>,
    verifier: Option<Arc<dyn CredentialVerifier>>,
    resolver: Option<Arc<dyn JobResolver>>,
    ws_buffer_size: Option<usize>,
}

impl TunnelServerBuilder {
    pub(crate) fn new(config: ServerConfig) -> Self {
        Self {
            config,
            settings: None,
            verifier: None,
            resolver: None,
            ws_buffer_size: None,
        }
    }

    /// Resolve the control port through `settings`
    pub fn settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Verify handshake credentials with `verifier`
    pub fn verifier(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Resolve dynamic routes with `resolver`
    pub fn resolver(mut self, resolver: Arc<dyn JobResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Override the transport buffer size (default: `WS_BUFF_SIZE`)
    pub fn ws_buffer_size(mut self, size: usize) -> Self {
        self.ws_buffer_size = Some(size);
        self
    }

    /// Construct the server
    pub async fn build(self) -> Result<TunnelServer, BootstrapError> {
        let config = self.config;

        let users = Arc::new(UserIndex::new());
        if let Some(path) = &config.auth_file {
            users.load_from_file(path)?;
        }
        if let Some(auth) = &config.auth {
            if let Some((name, secret)) = parse_auth(auth) {
                users.add(User::allow_all(name, secret));
            }
        }

        let identity = ServerIdentity::bootstrap(config.key_seed.as_deref())?;
        let ssh_config = ssh_config(&config, &identity);

        let static_proxy = match &config.proxy {
            Some(raw) => Some(static_proxy(raw)?),
            None => None,
        };

        let settings = match self.settings {
            Some(settings) => settings,
            None => default_settings(&config)?,
        };
        let control_port = settings.resolve(CONTROL_PORT_SETTING).await?;
        tracing::debug!("Control service at {}:{}", config.control_host, control_port);

        let resolver: Arc<dyn JobResolver> = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(HttpJobResolver::new(&config.control_host, &control_port)?),
        };

        let verifier: Arc<dyn CredentialVerifier> = match (self.verifier, &config.auth_endpoint) {
            (Some(verifier), _) => verifier,
            (None, Some(endpoint)) => Arc::new(HttpCredentialVerifier::new(endpoint)?),
            (None, None) => Arc::new(RegistryVerifier::new(Arc::clone(&users))),
        };

        if config.reverse {
            tracing::info!("Reverse tunnelling enabled");
        }

        let sessions = Arc::new(SessionRegistry::new());
        let auth = AuthGateway::new(Arc::clone(&users), Arc::clone(&sessions), verifier);
        let ws_buffer_size = self
            .ws_buffer_size
            .unwrap_or_else(|| env_usize(BUFFER_SIZE_ENV, 0));

        let state = GatewayState {
            config,
            users,
            sessions,
            auth,
            routes: Arc::new(DynamicProxyRegistry::new(resolver)),
            static_proxy,
            ssh_config: Arc::new(ssh_config),
            ws_buffer_size,
            tracker: TaskTracker::new(),
            force_close: CancellationToken::new(),
        };

        Ok(TunnelServer::new(Arc::new(state), identity))
    }
}

fn default_settings(config: &ServerConfig) -> Result<Arc<dyn SettingsProvider>, BootstrapError> {
    match &config.control_port {
        Some(port) => Ok(Arc::new(
            StaticSettingsProvider::new().with(CONTROL_PORT_SETTING, port.clone()),
        )),
        None => Ok(Arc::new(PostgresSettingsProvider::from_env()?)),
    }
}

fn static_proxy(raw: &str) -> Result<ReverseProxy, BootstrapError> {
    let invalid = |e: TargetError| match e {
        TargetError::MissingHost => BootstrapError::MissingProxyHost(raw.to_string()),
        TargetError::Invalid(reason) => BootstrapError::InvalidProxyUrl {
            url: raw.to_string(),
            reason,
        },
    };

    let target = parse_target(raw).map_err(invalid)?;
    ReverseProxy::new(target).map_err(invalid)
}

fn ssh_config(config: &ServerConfig, identity: &ServerIdentity) -> SshConfig {
    let mut ssh = SshConfig::default();
    ssh.server_id = SshId::Standard(format!("SSH-{}-server", PROTOCOL_VERSION));
    ssh.methods = MethodSet::PASSWORD;
    ssh.auth_rejection_time = std::time::Duration::from_secs(1);
    ssh.auth_rejection_time_initial = Some(std::time::Duration::from_secs(0));
    ssh.keys.push(identity.key_pair());
    if !config.keepalive.is_zero() {
        ssh.keepalive_interval = Some(config.keepalive);
    }
    ssh
}
