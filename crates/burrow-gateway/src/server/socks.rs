//! SOCKS5 over a tunnel channel
//!
//! When `socks5` is enabled a client may open a channel to the `socks`
//! target and speak SOCKS5 on it. Only unauthenticated `CONNECT` is
//! supported.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Channel target that selects SOCKS5 mode
pub const SOCKS_TARGET: &str = "socks";

const VERSION: u8 = 0x05;
const NO_AUTH: u8 = 0x00;
const NO_ACCEPTABLE_METHOD: u8 = 0xff;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const REPLY_SUCCEEDED: u8 = 0x00;
const REPLY_HOST_UNREACHABLE: u8 = 0x04;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REPLY_ADDRESS_NOT_SUPPORTED: u8 = 0x08;

fn protocol_error(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Read the greeting and `CONNECT` request; returns the target `host:port`.
pub async fn handshake<S>(stream: &mut S) -> io::Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    if header[0] != VERSION {
        return Err(protocol_error(format!("unsupported SOCKS version {}", header[0])));
    }
    let mut methods = vec![0u8; header[1] as usize];
    stream.read_exact(&mut methods).await?;

    if !methods.contains(&NO_AUTH) {
        stream.write_all(&[VERSION, NO_ACCEPTABLE_METHOD]).await?;
        return Err(protocol_error("client offered no usable auth method"));
    }
    stream.write_all(&[VERSION, NO_AUTH]).await?;

    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    if request[0] != VERSION {
        return Err(protocol_error("bad request version"));
    }
    if request[1] != CMD_CONNECT {
        reply(stream, REPLY_COMMAND_NOT_SUPPORTED).await?;
        return Err(protocol_error(format!("unsupported command {}", request[1])));
    }

    let host = match request[3] {
        ATYP_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            Ipv4Addr::from(addr).to_string()
        }
        ATYP_IPV6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            format!("[{}]", Ipv6Addr::from(addr))
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await?;
            let mut name = vec![0u8; len as usize];
            stream.read_exact(&mut name).await?;
            String::from_utf8(name).map_err(|_| protocol_error("domain is not UTF-8"))?
        }
        other => {
            reply(stream, REPLY_ADDRESS_NOT_SUPPORTED).await?;
            return Err(protocol_error(format!("unsupported address type {}", other)));
        }
    };
    let port = stream.read_u16().await?;

    Ok(format!("{}:{}", host, port))
}

async fn reply<S>(stream: &mut S, code: u8) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    // Bound address is reported as 0.0.0.0:0.
    stream
        .write_all(&[VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
        .await
}

/// Serve one SOCKS5 session on `stream` until either side closes.
pub async fn serve<S>(mut stream: S) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let target = handshake(&mut stream).await?;

    let mut upstream = match TcpStream::connect(&target).await {
        Ok(upstream) => upstream,
        Err(e) => {
            reply(&mut stream, REPLY_HOST_UNREACHABLE).await?;
            return Err(e);
        }
    };
    reply(&mut stream, REPLY_SUCCEEDED).await?;

    tracing::debug!("SOCKS5 connected to {}", target);
    tokio::io::copy_bidirectional(&mut stream, &mut upstream).await?;
    Ok(())
}
