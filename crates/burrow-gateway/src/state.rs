//! Shared gateway state

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use burrow_core::config::ServerConfig;

use crate::auth::{AuthGateway, UserIndex};
use crate::proxy::{DynamicProxyRegistry, ReverseProxy};
use crate::session::SessionRegistry;

/// State shared by every connection the gateway serves
pub struct GatewayState {
    /// Bootstrap configuration
    pub config: ServerConfig,
    /// Registered users
    pub users: Arc<UserIndex>,
    /// Live authenticated sessions
    pub sessions: Arc<SessionRegistry>,
    /// Handshake authentication
    pub auth: AuthGateway,
    /// Dynamically resolved routes
    pub routes: Arc<DynamicProxyRegistry>,
    /// Fixed backend for everything else
    pub static_proxy: Option<ReverseProxy>,
    /// SSH server configuration (host key, keep-alive, methods)
    pub ssh_config: Arc<russh::server::Config>,
    /// Transport buffer size from `WS_BUFF_SIZE`; zero keeps the defaults
    pub ws_buffer_size: usize,
    /// Tracks connection and tunnel tasks so shutdown can wait for them
    pub tracker: TaskTracker,
    /// Fired by a forced close; every tunnel drops immediately
    pub force_close: CancellationToken,
}

impl GatewayState {
    /// Whether remote port forwarding is allowed
    pub fn reverse_enabled(&self) -> bool {
        self.config.reverse
    }

    /// Whether `socks` channel targets are allowed
    pub fn socks5_enabled(&self) -> bool {
        self.config.socks5
    }
}
