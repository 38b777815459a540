//! Tunnel server lifecycle
//!
//! `start` binds and serves in the background, `wait` blocks until the
//! listener and every connection it accepted have finished, `close` forces
//! everything down. Cancelling the token passed to `start_with_cancel`
//! triggers a graceful shutdown instead: no new connections, open ones
//! drain for up to `shutdown_timeout` and are then closed.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use burrow_core::config::ServerConfig;
use burrow_core::error::{ConfigError, TransportError};

use super::builder::TunnelServerBuilder;
use super::identity::ServerIdentity;
use super::listener::Listener;
use super::router::build_router;
use super::tls::build_acceptor;
use crate::auth::{User, UserIndex};
use crate::proxy::{run_route_eviction, DynamicProxyRegistry};
use crate::session::SessionRegistry;
use crate::state::GatewayState;

#[derive(Default)]
struct Lifecycle {
    started: bool,
    stop: Option<CancellationToken>,
    /// Flips to `true` once the listener has fully stopped
    done: Option<watch::Receiver<bool>>,
    local_addr: Option<SocketAddr>,
}

/// SSH-over-HTTP tunnel gateway
pub struct TunnelServer {
    state: Arc<GatewayState>,
    identity: ServerIdentity,
    lifecycle: Mutex<Lifecycle>,
}

impl TunnelServer {
    /// Start building a server from `config`
    pub fn builder(config: ServerConfig) -> TunnelServerBuilder {
        TunnelServerBuilder::new(config)
    }

    pub(crate) fn new(state: Arc<GatewayState>, identity: ServerIdentity) -> Self {
        Self {
            state,
            identity,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bind `host:port` and start serving in the background
    pub async fn start(&self, host: &str, port: u16) -> Result<(), TransportError> {
        self.start_with_cancel(CancellationToken::new(), host, port)
            .await
    }

    /// Like [`start`](Self::start); cancelling `cancel` shuts the server
    /// down gracefully.
    pub async fn start_with_cancel(
        &self,
        cancel: CancellationToken,
        host: &str,
        port: u16,
    ) -> Result<(), TransportError> {
        {
            let mut lifecycle = self.lifecycle();
            if lifecycle.started {
                return Err(TransportError::AlreadyStarted);
            }
            lifecycle.started = true;
        }
        let (done_tx, done_rx) = watch::channel(false);
        self.lifecycle().done = Some(done_rx);

        let bound = self.bind(host, port).await;
        let (listener, tls) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                let mut lifecycle = self.lifecycle();
                lifecycle.started = false;
                lifecycle.done = None;
                return Err(e);
            }
        };
        let local_addr = listener.local_addr()?;

        tracing::info!("Fingerprint {}", self.identity.fingerprint());
        if !self.state.users.is_empty() {
            tracing::info!("User authentication enabled");
        }
        if let Some(proxy) = &self.state.static_proxy {
            tracing::info!("Reverse proxy enabled ({})", proxy.target());
        }
        tracing::info!(
            "Listening on {}://{}",
            if tls.is_some() { "https" } else { "http" },
            local_addr
        );

        let stop = cancel.child_token();

        if let Some(max_idle) = self.state.config.route_idle_timeout {
            self.state.tracker.spawn(run_route_eviction(
                Arc::clone(&self.state.routes),
                max_idle,
                stop.clone(),
            ));
        }

        let router = build_router(Arc::clone(&self.state));
        let listener = Listener::new(listener, tls, router, Arc::clone(&self.state));
        tokio::spawn({
            let stop = stop.clone();
            async move {
                listener.run(stop).await;
                let _ = done_tx.send(true);
            }
        });

        let mut lifecycle = self.lifecycle();
        lifecycle.stop = Some(stop);
        lifecycle.local_addr = Some(local_addr);
        Ok(())
    }

    async fn bind(
        &self,
        host: &str,
        port: u16,
    ) -> Result<(TcpListener, Option<tokio_rustls::TlsAcceptor>), TransportError> {
        let tls = build_acceptor(&self.state.config.tls)?;
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        Ok((listener, tls))
    }

    /// Wait until the server has fully stopped.
    ///
    /// Any number of callers may wait at once; all of them return when the
    /// listener is done.
    pub async fn wait(&self) -> Result<(), TransportError> {
        let mut done = {
            let lifecycle = self.lifecycle();
            match (&lifecycle.done, lifecycle.started) {
                (Some(done), true) => done.clone(),
                _ => return Err(TransportError::NotStarted),
            }
        };

        let result = match done.wait_for(|stopped| *stopped).await {
            Ok(_) => Ok(()),
            Err(_) => Err(TransportError::Listener(std::io::Error::new(
                std::io::ErrorKind::Other,
                "listener task ended unexpectedly",
            ))),
        };
        result
    }

    /// Stop accepting and drop every open connection and tunnel now
    pub fn close(&self) {
        if let Some(stop) = &self.lifecycle().stop {
            stop.cancel();
        }
        self.state.force_close.cancel();
        tracing::info!("Server closed");
    }

    /// Start, then wait for the server to stop
    pub async fn run(&self, host: &str, port: u16) -> Result<(), TransportError> {
        self.start(host, port).await?;
        self.wait().await
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle().local_addr
    }

    /// Host key fingerprint
    pub fn fingerprint(&self) -> &str {
        self.identity.fingerprint()
    }

    /// Bootstrap configuration
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Add or replace a user
    pub fn add_user(
        &self,
        name: &str,
        secret: &str,
        patterns: &[impl AsRef<str>],
    ) -> Result<(), ConfigError> {
        self.state.users.add_user(name, secret, patterns)
    }

    /// Remove a user; unknown names are ignored
    pub fn delete_user(&self, name: &str) {
        self.state.users.delete(name);
    }

    /// Replace all users; an empty list clears them
    pub fn reset_users(&self, users: Vec<User>) {
        self.state.users.reset(users);
    }

    /// Registered users
    pub fn users(&self) -> &Arc<UserIndex> {
        &self.state.users
    }

    /// Live sessions
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.state.sessions
    }

    /// Dynamic routes
    pub fn routes(&self) -> &Arc<DynamicProxyRegistry> {
        &self.state.routes
    }
}
