//! WebSocket tunnel transport
//!
//! An upgraded connection carries a raw SSH byte stream in binary frames.
//! The socket is bridged onto one end of an in-memory duplex pipe and the
//! SSH server runs on the other end.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::Instrument;

use super::handler::TunnelHandler;
use crate::state::GatewayState;

/// Subprotocol a tunnel client must request in `Sec-WebSocket-Protocol`
pub const PROTOCOL_VERSION: &str = "burrow-v1";

/// Pipe capacity when `WS_BUFF_SIZE` is unset
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Environment variable holding the transport buffer size
pub const BUFFER_SIZE_ENV: &str = "WS_BUFF_SIZE";

fn ws_error(e: axum::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

/// Run one tunnel connection to completion.
pub async fn run_tunnel(state: Arc<GatewayState>, socket: WebSocket, peer_addr: SocketAddr) {
    let capacity = match state.ws_buffer_size {
        0 => DEFAULT_BUFFER_SIZE,
        n => n,
    };
    let (ssh_side, bridge_side) = tokio::io::duplex(capacity);

    let handler = TunnelHandler::new(Arc::clone(&state), peer_addr);
    let span = tracing::info_span!("tunnel", peer = %peer_addr, session = %handler.session_id());
    let config = Arc::clone(&state.ssh_config);

    async move {
        tracing::info!("Tunnel connection opened");

        let session = async {
            let running = russh::server::run_stream(config, ssh_side, handler).await?;
            running.await
        };

        tokio::select! {
            result = session => match result {
                Ok(()) => tracing::info!("Tunnel closed normally"),
                Err(e) => tracing::warn!("Tunnel closed with error: {}", e),
            },
            result = bridge(socket, bridge_side) => {
                if let Err(e) = result {
                    tracing::debug!("Transport error: {}", e);
                }
                tracing::info!("Tunnel transport closed");
            }
            _ = state.force_close.cancelled() => {
                tracing::info!("Tunnel closed by server shutdown");
            }
        }
    }
    .instrument(span)
    .await
}

/// Copy bytes between the WebSocket and the pipe until either side closes.
async fn bridge(socket: WebSocket, pipe: DuplexStream) -> io::Result<()> {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (mut reader, mut writer) = tokio::io::split(pipe);

    let inbound = async {
        while let Some(message) = ws_rx.next().await {
            match message.map_err(ws_error)? {
                Message::Binary(data) => writer.write_all(&data).await?,
                Message::Text(text) => writer.write_all(text.as_bytes()).await?,
                Message::Close(_) => break,
                // Ping/pong are answered by the socket itself
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
        writer.shutdown().await
    };

    let outbound = async {
        let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            ws_tx
                .send(Message::Binary(buf[..n].to_vec()))
                .await
                .map_err(ws_error)?;
        }
        // The peer may already be gone.
        let _ = ws_tx.send(Message::Close(None)).await;
        Ok::<(), io::Error>(())
    };

    tokio::select! {
        result = inbound => result,
        result = outbound => result,
    }
}
