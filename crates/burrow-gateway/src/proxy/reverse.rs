//! Reverse proxy handler
//!
//! Forwards a request to a fixed backend. The director always takes scheme
//! and host from the backend and keeps the inbound path, query and body.

use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use reqwest::Url;

/// Timeout for establishing the backend connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Headers that apply to a single hop and must not be forwarded
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Why a backend target was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    /// Not parseable as a URL
    #[error("{0}")]
    Invalid(String),
    /// Parsed, but without a host
    #[error("missing host")]
    MissingHost,
}

/// Parse a backend target, requiring a host
pub fn parse_target(raw: &str) -> Result<Url, TargetError> {
    let url = Url::parse(raw.trim()).map_err(|e| TargetError::Invalid(e.to_string()))?;
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(TargetError::MissingHost),
    }
}

/// Forwards requests to a single backend
#[derive(Debug, Clone)]
pub struct ReverseProxy {
    target: Url,
    /// `host[:port]` of the target, used for the URI and Host header
    authority: String,
    client: reqwest::Client,
}

impl ReverseProxy {
    /// Create a proxy bound to `target` with its own connection pool
    pub fn new(target: Url) -> Result<Self, TargetError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TargetError::Invalid(e.to_string()))?;
        Self::with_client(target, client)
    }

    /// Create a proxy bound to `target` using an existing client
    pub fn with_client(target: Url, client: reqwest::Client) -> Result<Self, TargetError> {
        let host = target.host_str().ok_or(TargetError::MissingHost)?;
        let authority = match target.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(Self {
            target,
            authority,
            client,
        })
    }

    /// The backend this proxy forwards to
    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Rewrite an inbound URI onto the backend
    pub fn rewrite(&self, uri: &Uri) -> String {
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        format!("{}://{}{}", self.target.scheme(), self.authority, path_and_query)
    }

    /// Forward one request and stream the backend's response back
    pub async fn forward(&self, req: Request) -> Response {
        let url = self.rewrite(req.uri());
        let (parts, body) = req.into_parts();

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        match HeaderValue::from_str(&self.authority) {
            Ok(host) => {
                headers.insert(header::HOST, host);
            }
            Err(_) => {
                headers.remove(header::HOST);
            }
        }

        tracing::debug!("Proxying {} {} -> {}", parts.method, parts.uri, url);

        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await;

        match upstream {
            Ok(upstream) => {
                let status = upstream.status();
                let mut headers = upstream.headers().clone();
                strip_hop_by_hop(&mut headers);

                let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                response
            }
            Err(e) => {
                tracing::warn!("Proxy request to {} failed: {}", self.authority, e);
                (StatusCode::BAD_GATEWAY, "Bad gateway").into_response()
            }
        }
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_requires_host() {
        assert!(parse_target("http://backend.internal").is_ok());
        assert_eq!(parse_target("unix:/tmp/sock"), Err(TargetError::MissingHost));
        assert!(matches!(
            parse_target("backend.internal"),
            Err(TargetError::Invalid(_))
        ));
    }

    #[test]
    fn test_rewrite_keeps_path_and_query() {
        let proxy = ReverseProxy::new(parse_target("http://backend.internal").unwrap()).unwrap();
        let uri: Uri = "https://public.example.com/svc/x?y=1".parse().unwrap();
        assert_eq!(proxy.rewrite(&uri), "http://backend.internal/svc/x?y=1");
    }

    #[test]
    fn test_rewrite_ignores_target_path_and_keeps_port() {
        let proxy =
            ReverseProxy::new(parse_target("https://10.1.2.3:8888/ignored").unwrap()).unwrap();
        let uri: Uri = "/lab/tree".parse().unwrap();
        assert_eq!(proxy.rewrite(&uri), "https://10.1.2.3:8888/lab/tree");
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        strip_hop_by_hop(&mut headers);
        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get(header::CONTENT_TYPE).is_some());
    }
}
