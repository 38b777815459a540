//! HTTP listener
//!
//! Accepts TCP connections, optionally terminates TLS, and serves each one
//! with hyper so upgraded tunnel connections can outlive the request.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::state::GatewayState;

/// Accept loop for the gateway
pub struct Listener {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    router: Router,
    state: Arc<GatewayState>,
}

impl Listener {
    /// Wrap a bound listener
    pub fn new(
        listener: TcpListener,
        tls: Option<TlsAcceptor>,
        router: Router,
        state: Arc<GatewayState>,
    ) -> Self {
        Self {
            listener,
            tls,
            router,
            state,
        }
    }

    /// Serve until `shutdown` fires, then wait for in-flight connections.
    ///
    /// Open connections finish their current requests and tunnels drain for
    /// at most `shutdown_timeout`, after which the force-close token is
    /// cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Listener shutting down");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => {
                            tracing::debug!("New connection from {}", peer_addr);
                            self.spawn_connection(socket, peer_addr, shutdown.clone());
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        drop(self.listener);
        self.state.tracker.close();

        let grace = self.state.config.shutdown_timeout;
        if timeout(grace, self.state.tracker.wait()).await.is_err() {
            tracing::warn!(
                "{} connections still open after {:?}, closing them",
                self.state.tracker.len(),
                grace
            );
            self.state.force_close.cancel();
            self.state.tracker.wait().await;
        }
        tracing::info!("All connections closed");
    }

    fn spawn_connection(
        &self,
        socket: tokio::net::TcpStream,
        peer_addr: SocketAddr,
        shutdown: CancellationToken,
    ) {
        let tls = self.tls.clone();
        let router = self.router.clone();
        let force = self.state.force_close.clone();

        self.state.tracker.spawn(async move {
            match tls {
                Some(acceptor) => {
                    let stream = tokio::select! {
                        result = acceptor.accept(socket) => match result {
                            Ok(stream) => stream,
                            Err(e) => {
                                tracing::warn!("TLS handshake failed from {}: {}", peer_addr, e);
                                return;
                            }
                        },
                        _ = force.cancelled() => return,
                    };
                    serve_connection(stream, peer_addr, router, shutdown, force).await;
                }
                None => serve_connection(socket, peer_addr, router, shutdown, force).await,
            }
        });
    }
}

/// Serve HTTP/1.1 on one connection, with upgrades
async fn serve_connection<S>(
    stream: S,
    peer_addr: SocketAddr,
    router: Router,
    shutdown: CancellationToken,
    force: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |mut req: hyper::Request<Incoming>| {
        req.extensions_mut().insert(ConnectInfo(peer_addr));
        router.clone().oneshot(req.map(Body::new))
    });

    let conn = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            tokio::select! {
                result = conn.as_mut() => result,
                _ = force.cancelled() => Ok(()),
            }
        }
        _ = force.cancelled() => Ok(()),
    };

    if let Err(e) = result {
        tracing::debug!("HTTP connection error from {}: {}", peer_addr, e);
    }
}
