//! Minimal SOCKS5 client (spec Design Notes: "no-auth, CONNECT command only,
//! do not pull in a full SOCKS server library").
//!
//! Implements just enough of RFC 1928 to negotiate no-auth and issue a
//! CONNECT to a `host:port` target. Used by the load balancer to tunnel
//! client traffic through a worker's SOCKS port, and by the health monitor
//! to route its probes the same way.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::constants::SOCKS_HANDSHAKE_TIMEOUT_MS;
use crate::error::ProxyError;

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const REPLY_SUCCEEDED: u8 = 0x00;

/// Connects to `proxy_addr` and negotiates a CONNECT tunnel to `target_host:target_port`.
/// On success, returns the now-tunneled stream; the caller may immediately begin
/// relaying application bytes over it.
pub async fn connect(
    proxy_addr: &str,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream, ProxyError> {
    let handshake_timeout = Duration::from_millis(SOCKS_HANDSHAKE_TIMEOUT_MS);

    let mut stream = timeout(handshake_timeout, TcpStream::connect(proxy_addr))
        .await
        .map_err(|_| ProxyError::UpstreamTimeout(format!("connect to {proxy_addr}")))?
        .map_err(|e| ProxyError::BackendDial(format!("{proxy_addr}: {e}")))?;

    timeout(
        handshake_timeout,
        negotiate(&mut stream, target_host, target_port),
    )
    .await
    .map_err(|_| ProxyError::UpstreamTimeout("SOCKS5 handshake".to_string()))??;

    Ok(stream)
}

async fn negotiate(
    stream: &mut TcpStream,
    target_host: &str,
    target_port: u16,
) -> Result<(), ProxyError> {
    // Greeting: version, 1 method, no-auth.
    stream
        .write_all(&[VERSION, 0x01, METHOD_NO_AUTH])
        .await
        .map_err(|e| ProxyError::SocksNegotiation(format!("greeting write: {e}")))?;

    let mut reply = [0u8; 2];
    stream
        .read_exact(&mut reply)
        .await
        .map_err(|e| ProxyError::SocksNegotiation(format!("greeting read: {e}")))?;

    if reply[0] != VERSION {
        return Err(ProxyError::SocksNegotiation(format!(
            "unexpected SOCKS version {}",
            reply[0]
        )));
    }
    if reply[1] != METHOD_NO_AUTH {
        return Err(ProxyError::SocksNegotiation(
            "worker requires unsupported auth method".to_string(),
        ));
    }

    // CONNECT request.
    let mut request = vec![VERSION, CMD_CONNECT, 0x00];
    encode_address(&mut request, target_host, target_port)?;
    stream
        .write_all(&request)
        .await
        .map_err(|e| ProxyError::SocksNegotiation(format!("connect request write: {e}")))?;

    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|e| ProxyError::SocksNegotiation(format!("connect reply read: {e}")))?;

    if header[0] != VERSION {
        return Err(ProxyError::SocksNegotiation(format!(
            "unexpected SOCKS version {} in reply",
            header[0]
        )));
    }
    if header[1] != REPLY_SUCCEEDED {
        return Err(ProxyError::SocksNegotiation(format!(
            "worker rejected CONNECT with reply code {}",
            header[1]
        )));
    }

    // Drain the bound address the server echoes back; its length depends on ATYP.
    let skip = match header[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len_buf = [0u8; 1];
            stream
                .read_exact(&mut len_buf)
                .await
                .map_err(|e| ProxyError::SocksNegotiation(format!("bound addr len: {e}")))?;
            len_buf[0] as usize
        }
        other => {
            return Err(ProxyError::SocksNegotiation(format!(
                "unexpected address type {other} in reply"
            )))
        }
    };
    let mut discard = vec![0u8; skip + 2]; // + bound port
    stream
        .read_exact(&mut discard)
        .await
        .map_err(|e| ProxyError::SocksNegotiation(format!("bound addr/port: {e}")))?;

    Ok(())
}

fn encode_address(buf: &mut Vec<u8>, host: &str, port: u16) -> Result<(), ProxyError> {
    if let Ok(ipv4) = host.parse::<std::net::Ipv4Addr>() {
        buf.push(ATYP_IPV4);
        buf.extend_from_slice(&ipv4.octets());
    } else if let Ok(ipv6) = host.parse::<std::net::Ipv6Addr>() {
        buf.push(ATYP_IPV6);
        buf.extend_from_slice(&ipv6.octets());
    } else {
        if host.len() > 255 {
            return Err(ProxyError::SocksNegotiation(
                "target hostname too long for SOCKS5".to_string(),
            ));
        }
        buf.push(ATYP_DOMAIN);
        buf.push(host.len() as u8);
        buf.extend_from_slice(host.as_bytes());
    }
    buf.extend_from_slice(&port.to_be_bytes());
    Ok(())
}
