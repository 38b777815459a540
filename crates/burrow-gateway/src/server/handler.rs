//! Per-connection SSH handler
//!
//! One handler lives for the duration of one tunnel connection. It runs the
//! password handshake through the [`AuthGateway`](crate::auth::AuthGateway),
//! then serves `direct-tcpip` channels and, when enabled, remote port
//! forwards for the authenticated user.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use russh::server::{Auth, Handle, Handler, Msg, Session};
use russh::Channel;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use burrow_core::traits::Credentials;
use burrow_core::SessionId;

use super::socks::{self, SOCKS_TARGET};
use crate::auth::{AuthOutcome, User};
use crate::state::GatewayState;

/// Handler for a single tunnel connection
pub struct TunnelHandler {
    state: Arc<GatewayState>,
    peer_addr: SocketAddr,
    session_id: SessionId,
    /// Set after a successful handshake
    outcome: Option<AuthOutcome>,
    /// Active remote forwards by (address, port)
    forwards: HashMap<(String, u32), CancellationToken>,
    /// Cancelled when the connection ends; parent of every forward
    cancel: CancellationToken,
}

impl TunnelHandler {
    /// Create a handler for a connection from `peer_addr`
    pub fn new(state: Arc<GatewayState>, peer_addr: SocketAddr) -> Self {
        let cancel = state.force_close.child_token();
        Self {
            state,
            peer_addr,
            session_id: SessionId::generate(),
            outcome: None,
            forwards: HashMap::new(),
            cancel,
        }
    }

    /// Session identifier of this connection
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Authenticated user, if any
    fn user(&self) -> Option<&Arc<User>> {
        self.outcome.as_ref().and_then(AuthOutcome::user)
    }

    /// Whether the connection may reach `addr`; open mode allows everything.
    fn allows(&self, addr: &str) -> bool {
        match &self.outcome {
            Some(AuthOutcome::Open) => true,
            Some(AuthOutcome::Authenticated(user)) => user.has_access(addr),
            None => false,
        }
    }

    fn user_name(&self) -> &str {
        self.user().map(|u| u.name.as_str()).unwrap_or("-")
    }
}

impl Drop for TunnelHandler {
    fn drop(&mut self) {
        self.cancel.cancel();
        if matches!(self.outcome, Some(AuthOutcome::Authenticated(_))) {
            self.state.sessions.end(&self.session_id);
        }
        tracing::debug!(
            "Tunnel from {} closed (session {})",
            self.peer_addr,
            self.session_id
        );
    }
}

#[async_trait]
impl Handler for TunnelHandler {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let credentials = Credentials {
            user: user.to_string(),
            secret: password.to_string(),
            session_id: self.session_id.clone(),
        };

        match self.state.auth.authenticate(&credentials).await {
            Ok(outcome) => {
                tracing::debug!(
                    "Handshake accepted from {} (session {})",
                    self.peer_addr,
                    self.session_id
                );
                self.outcome = Some(outcome);
                Ok(Auth::Accept)
            }
            Err(_) => Ok(Auth::Reject {
                proceed_with_methods: None,
            }),
        }
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let target = format!("{}:{}", host_to_connect, port_to_connect);

        if !self.allows(&target) {
            tracing::warn!(
                "Access to {} denied for user {} ({})",
                target,
                self.user_name(),
                self.peer_addr
            );
            return Ok(false);
        }

        let socks = host_to_connect == SOCKS_TARGET;
        if socks && !self.state.socks5_enabled() {
            tracing::warn!("SOCKS5 is disabled, refusing channel from {}", self.peer_addr);
            return Ok(false);
        }

        tracing::debug!(
            "Opening channel {} -> {} for {}:{}",
            self.peer_addr,
            target,
            originator_address,
            originator_port
        );

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut stream = channel.into_stream();

            let relay = async {
                if socks {
                    return socks::serve(stream).await;
                }
                let mut upstream = TcpStream::connect(&target).await?;
                tokio::io::copy_bidirectional(&mut stream, &mut upstream).await?;
                Ok(())
            };

            tokio::select! {
                result = relay => {
                    if let Err(e) = result {
                        tracing::debug!("Channel to {} ended: {}", target, e);
                    }
                }
                _ = cancel.cancelled() => {}
            }
        });

        Ok(true)
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if !self.state.reverse_enabled() {
            tracing::warn!(
                "Reverse tunnelling is disabled, refusing forward from {}",
                self.peer_addr
            );
            return Ok(false);
        }

        let Some((remote, bind_port)) = remote_forward(address, *port) else {
            tracing::warn!("Invalid forward port {} from {}", port, self.peer_addr);
            return Ok(false);
        };
        if !self.allows(&remote) {
            tracing::warn!(
                "Access to {} denied for user {} ({})",
                remote,
                self.user_name(),
                self.peer_addr
            );
            return Ok(false);
        }

        let bind_host = if address.is_empty() || address == "*" {
            "0.0.0.0"
        } else {
            address
        };
        let listener = match TcpListener::bind((bind_host, bind_port)).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::warn!("Failed to bind {}:{}: {}", bind_host, port, e);
                return Ok(false);
            }
        };
        if *port == 0 {
            if let Ok(addr) = listener.local_addr() {
                *port = addr.port() as u32;
            }
        }

        tracing::info!("Reverse forward {}:{} opened for {}", address, port, self.peer_addr);

        let cancel = self.cancel.child_token();
        self.forwards
            .insert((address.to_string(), *port), cancel.clone());

        tokio::spawn(run_forward(
            listener,
            session.handle(),
            address.to_string(),
            *port,
            cancel,
        ));

        Ok(true)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        match self.forwards.remove(&(address.to_string(), port)) {
            Some(cancel) => {
                cancel.cancel();
                tracing::info!("Reverse forward {}:{} cancelled", address, port);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Access-check name and bind port for a remote forward request.
///
/// `None` when the requested port does not fit a TCP port.
fn remote_forward(address: &str, port: u32) -> Option<(String, u16)> {
    let bind_port = u16::try_from(port).ok()?;
    Some((format!("R:{}:{}", address, bind_port), bind_port))
}

/// Accept on a remote-forward listener and relay each connection back over
/// a `forwarded-tcpip` channel.
async fn run_forward(
    listener: TcpListener,
    handle: Handle,
    address: String,
    port: u32,
    cancel: CancellationToken,
) {
    loop {
        let (mut socket, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            result = listener.accept() => match result {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Reverse forward {}:{} accept failed: {}", address, port, e);
                    break;
                }
            }
        };

        let handle = handle.clone();
        let address = address.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let channel = match handle
                .channel_open_forwarded_tcpip(
                    address.clone(),
                    port,
                    peer.ip().to_string(),
                    peer.port() as u32,
                )
                .await
            {
                Ok(channel) => channel,
                Err(e) => {
                    tracing::warn!("Failed to open forwarded channel for {}: {:?}", peer, e);
                    return;
                }
            };

            let mut stream = channel.into_stream();
            tokio::select! {
                result = tokio::io::copy_bidirectional(&mut socket, &mut stream) => {
                    if let Err(e) = result {
                        tracing::debug!("Forwarded connection from {} ended: {}", peer, e);
                    }
                }
                _ = cancel.cancelled() => {}
            }
        });
    }

    tracing::debug!("Reverse forward {}:{} stopped", address, port);
}
