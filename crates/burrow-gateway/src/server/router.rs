//! Request dispatch
//!
//! Every request lands in one fallback handler which picks, in order:
//! the tunnel upgrade, a dynamic route, the static proxy, and finally the
//! built-in `/health` and `/version` endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::header::{self, HeaderMap};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;

use burrow_core::RoutingKey;

use super::transport::{run_tunnel, PROTOCOL_VERSION};
use crate::state::GatewayState;

/// Build the router serving every inbound request
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let router = Router::new()
        .fallback(dispatch)
        .with_state(Arc::clone(&state));

    if state.config.verbose {
        router.layer(middleware::from_fn(log_request))
    } else {
        router
    }
}

/// Whether the request asks for a tunnel upgrade with our protocol version
pub fn is_tunnel_upgrade(headers: &HeaderMap) -> bool {
    let websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    if !websocket {
        return false;
    }

    headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|p| p.trim() == PROTOCOL_VERSION)
}

async fn dispatch(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    if is_tunnel_upgrade(req.headers()) {
        return upgrade(state, peer_addr, req).await;
    }
    if req.headers().contains_key(header::UPGRADE) {
        tracing::debug!("Ignored upgrade from {} without protocol {}", peer_addr, PROTOCOL_VERSION);
    }

    if let Some(key) = RoutingKey::from_path(&state.config.dynamic_prefix, req.uri().path()) {
        return match state.routes.resolve(&key).await {
            Ok(route) => route.handler.forward(req).await,
            Err(e) => {
                tracing::warn!("No route for {}: {}", key, e);
                (StatusCode::BAD_GATEWAY, format!("Unable to reach {}\n", key)).into_response()
            }
        };
    }

    if let Some(proxy) = &state.static_proxy {
        return proxy.forward(req).await;
    }

    match req.uri().path() {
        "/health" => (StatusCode::OK, "OK\n").into_response(),
        "/version" => (StatusCode::OK, env!("CARGO_PKG_VERSION")).into_response(),
        _ => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

async fn upgrade(state: Arc<GatewayState>, peer_addr: SocketAddr, req: Request) -> Response {
    let (mut parts, _body) = req.into_parts();
    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::debug!("Rejected tunnel upgrade from {}: {}", peer_addr, rejection);
            return rejection.into_response();
        }
    };

    let mut ws = ws.protocols([PROTOCOL_VERSION]);
    if state.ws_buffer_size > 0 {
        ws = ws.write_buffer_size(state.ws_buffer_size);
    }

    let tracker = state.tracker.clone();
    ws.on_upgrade(move |socket| tracker.track_future(run_tunnel(state, socket, peer_addr)))
}

async fn log_request(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    tracing::info!(
        "{} {} {} ({:?})",
        method,
        path,
        response.status().as_u16(),
        started.elapsed()
    );
    response
}
