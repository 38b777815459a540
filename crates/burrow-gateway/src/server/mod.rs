//! Tunnel server
//!
//! HTTP listener, tunnel transport and the SSH handshake pipeline.

mod builder;
mod handler;
mod identity;
mod lifecycle;
mod listener;
mod router;
mod socks;
mod tls;
mod transport;

pub use builder::TunnelServerBuilder;
pub use handler::TunnelHandler;
pub use identity::ServerIdentity;
pub use lifecycle::TunnelServer;
pub use router::{build_router, is_tunnel_upgrade};
pub use transport::{BUFFER_SIZE_ENV, DEFAULT_BUFFER_SIZE, PROTOCOL_VERSION};
