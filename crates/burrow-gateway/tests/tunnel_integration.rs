//! Tunnel integration tests
//!
//! Drives real SSH clients through the WebSocket upgrade against a gateway
//! on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use russh::client;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use burrow_core::config::ServerConfig;
use burrow_core::error::AuthError;
use burrow_core::traits::{
    CredentialVerifier, Credentials, StaticSettingsProvider, CONTROL_PORT_SETTING,
};
use burrow_gateway::server::PROTOCOL_VERSION;
use burrow_gateway::TunnelServer;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Provider that accepts every credential
struct AcceptAll;

#[async_trait]
impl CredentialVerifier for AcceptAll {
    async fn verify(&self, _credentials: &Credentials) -> Result<(), AuthError> {
        Ok(())
    }
}

/// SSH client that pins the gateway's host key fingerprint
struct PinnedClient {
    fingerprint: String,
}

#[async_trait]
impl client::Handler for PinnedClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(format!("SHA256:{}", server_public_key.fingerprint()) == self.fingerprint)
    }
}

async fn start(
    config: ServerConfig,
    verifier: Option<Arc<dyn CredentialVerifier>>,
) -> TunnelServer {
    let mut builder = TunnelServer::builder(config).settings(Arc::new(
        StaticSettingsProvider::new().with(CONTROL_PORT_SETTING, "50051"),
    ));
    if let Some(verifier) = verifier {
        builder = builder.verifier(verifier);
    }
    let server = builder.build().await.unwrap();
    server.start("127.0.0.1", 0).await.unwrap();
    server
}

/// Complete the tunnel upgrade and return the raw WebSocket
async fn upgrade(addr: SocketAddr) -> WsStream {
    let mut request = format!("ws://{}/", addr).into_client_request().unwrap();
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static(PROTOCOL_VERSION),
    );
    let (ws, _response) = tokio_tungstenite::connect_async(request).await.unwrap();
    ws
}

/// Copy between a WebSocket and a pipe until either side closes
async fn pump(ws: WsStream, pipe: DuplexStream) {
    let (mut sink, mut stream) = ws.split();
    let (mut reader, mut writer) = tokio::io::split(pipe);

    let inbound = async {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Binary(data) => {
                    if writer.write_all(&data).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        let _ = writer.shutdown().await;
    };

    let outbound = async {
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if sink.send(Message::Binary(buf[..n].to_vec())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    };

    tokio::select! {
        _ = inbound => {}
        _ = outbound => {}
    }
}

/// Open an SSH client session through the tunnel
async fn connect(server: &TunnelServer) -> client::Handle<PinnedClient> {
    let ws = upgrade(server.local_addr().unwrap()).await;
    let (local, remote) = tokio::io::duplex(64 * 1024);
    tokio::spawn(pump(ws, remote));

    let handler = PinnedClient {
        fingerprint: server.fingerprint().to_string(),
    };
    client::connect_stream(Arc::new(client::Config::default()), local, handler)
        .await
        .unwrap()
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
}

/// TCP server that echoes every byte back
async fn spawn_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn test_session_recorded_on_login_and_removed_on_disconnect() {
    let config = ServerConfig {
        auth: Some("all:all".to_string()),
        ..ServerConfig::default()
    };
    let server = start(config, Some(Arc::new(AcceptAll))).await;

    let mut handle = connect(&server).await;
    assert!(handle.authenticate_password("alice", "token").await.unwrap());
    assert_eq!(server.sessions().len(), 1);

    handle
        .disconnect(russh::Disconnect::ByApplication, "", "en")
        .await
        .unwrap();
    drop(handle);

    wait_for(|| server.sessions().is_empty()).await;
    server.close();
}

#[tokio::test]
async fn test_login_rejected_when_catch_all_secret_differs() {
    let config = ServerConfig {
        auth: Some("all:not-all".to_string()),
        ..ServerConfig::default()
    };
    let server = start(config, Some(Arc::new(AcceptAll))).await;

    let mut handle = connect(&server).await;
    assert!(!handle.authenticate_password("alice", "token").await.unwrap());
    assert!(server.sessions().is_empty());

    server.close();
}

#[tokio::test]
async fn test_direct_tcpip_follows_user_patterns() {
    let echo = spawn_echo().await;
    let server = start(ServerConfig::default(), None).await;
    server
        .add_user("all", "all", &[format!("127\\.0\\.0\\.1:{}", echo.port())])
        .unwrap();

    let mut handle = connect(&server).await;
    assert!(handle.authenticate_password("all", "all").await.unwrap());

    let channel = handle
        .channel_open_direct_tcpip("127.0.0.1", echo.port() as u32, "127.0.0.1", 40000)
        .await
        .unwrap();
    let mut stream = channel.into_stream();
    stream.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"ping");

    let denied = handle
        .channel_open_direct_tcpip("127.0.0.1", echo.port() as u32 + 1, "127.0.0.1", 40001)
        .await;
    assert!(denied.is_err());

    server.close();
}

#[tokio::test]
async fn test_graceful_stop_closes_idle_tunnels_after_deadline() {
    let config = ServerConfig {
        shutdown_timeout: Duration::from_millis(200),
        ..ServerConfig::default()
    };
    let server = TunnelServer::builder(config)
        .settings(Arc::new(
            StaticSettingsProvider::new().with(CONTROL_PORT_SETTING, "50051"),
        ))
        .build()
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    server
        .start_with_cancel(cancel.clone(), "127.0.0.1", 0)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    // Upgraded but never speaks SSH
    let _idle = upgrade(addr).await;
    cancel.cancel();

    let (first, second) = timeout(Duration::from_secs(5), async {
        tokio::join!(server.wait(), server.wait())
    })
    .await
    .unwrap();
    first.unwrap();
    second.unwrap();

    server.wait().await.unwrap();
    assert!(TcpStream::connect(addr).await.is_err());
}
