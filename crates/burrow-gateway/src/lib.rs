//! burrow-gateway: SSH tunnels over HTTP upgrade
//!
//! The gateway accepts HTTP connections, upgrades tunnel requests to a
//! WebSocket carrying an SSH session, and authenticates each handshake
//! against the user registry and an external credential provider. Other
//! traffic is reverse proxied, either to a route resolved per job through
//! the job-scheduling service or to a single fixed backend.

pub mod auth;
pub mod proxy;
pub mod server;
pub mod session;
pub mod settings;
pub mod state;

pub use server::{ServerIdentity, TunnelServer, TunnelServerBuilder};
pub use state::GatewayState;
