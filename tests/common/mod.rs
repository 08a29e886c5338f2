//! Shared fixtures for the end-to-end scenario tests (spec.md §8).
//!
//! Workers are never the real Tor binary here - just an in-process task
//! that accepts a TCP connection and speaks SOCKS5 no-auth, per the design
//! notes' "minimal client implementation" guidance applied symmetrically to
//! the test doubles standing in for the worker side of that protocol.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const SOCKS_NO_AUTH_GREETING_REPLY: [u8; 2] = [0x05, 0x00];

async fn read_socks5_connect_request(stream: &mut TcpStream) -> (String, u16) {
    let mut greeting_header = [0u8; 2];
    stream.read_exact(&mut greeting_header).await.unwrap();
    let mut methods = vec![0u8; greeting_header[1] as usize];
    stream.read_exact(&mut methods).await.unwrap();
    stream.write_all(&SOCKS_NO_AUTH_GREETING_REPLY).await.unwrap();

    let mut request_header = [0u8; 4];
    stream.read_exact(&mut request_header).await.unwrap();
    let atyp = request_header[3];
    let host = match atyp {
        0x01 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await.unwrap();
            std::net::Ipv4Addr::from(octets).to_string()
        }
        0x03 => {
            let mut len_buf = [0u8; 1];
            stream.read_exact(&mut len_buf).await.unwrap();
            let mut domain = vec![0u8; len_buf[0] as usize];
            stream.read_exact(&mut domain).await.unwrap();
            String::from_utf8(domain).unwrap()
        }
        0x04 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await.unwrap();
            std::net::Ipv6Addr::from(octets).to_string()
        }
        other => panic!("unsupported ATYP in test fixture: {other}"),
    };
    let mut port_buf = [0u8; 2];
    stream.read_exact(&mut port_buf).await.unwrap();
    (host, u16::from_be_bytes(port_buf))
}

async fn write_socks5_connect_reply(stream: &mut TcpStream, succeeded: bool) {
    let rep = if succeeded { 0x00 } else { 0x01 };
    stream
        .write_all(&[0x05, rep, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
        .unwrap();
}

/// A stub worker that, regardless of the requested target, replies to the
/// SOCKS5 CONNECT and then writes back a canned `200 OK` tagged with `tag` -
/// this is the literal "stub binary that ... echoes a 200 for any target"
/// from scenario S1.
pub async fn spawn_canned_200_worker(tag: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let _ = read_socks5_connect_request(&mut stream).await;
                write_socks5_connect_reply(&mut stream, true).await;
                let body = format!("served-by-{tag}");
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    });

    addr
}

/// A stub worker whose first `N` CONNECT attempts are rejected at the SOCKS5
/// layer (reply code `general failure`); every attempt after that succeeds
/// with a canned 200, mirroring a backend that is flaky then recovers.
pub async fn spawn_flaky_worker(tag: &'static str, fail_first_n: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let attempts = Arc::clone(&attempts);
            tokio::spawn(async move {
                let _ = read_socks5_connect_request(&mut stream).await;
                let attempt_no = attempts.fetch_add(1, Ordering::SeqCst);
                if attempt_no < fail_first_n {
                    write_socks5_connect_reply(&mut stream, false).await;
                    return;
                }
                write_socks5_connect_reply(&mut stream, true).await;
                let body = format!("served-by-{tag}");
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    });

    addr
}

/// A worker that actually tunnels: on CONNECT it dials the requested target
/// for real and byte-copies both directions, for scenarios that exercise
/// genuine end-to-end relaying (CONNECT tunneling).
pub async fn spawn_relaying_worker() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let (host, port) = read_socks5_connect_request(&mut stream).await;
                match TcpStream::connect((host.as_str(), port)).await {
                    Ok(mut target) => {
                        write_socks5_connect_reply(&mut stream, true).await;
                        let _ = tokio::io::copy_bidirectional(&mut stream, &mut target).await;
                    }
                    Err(_) => {
                        write_socks5_connect_reply(&mut stream, false).await;
                    }
                }
            });
        }
    });

    addr
}

/// A socket address nobody is listening on, for simulating a dead worker
/// (connection refused) without tearing down a real listener mid-test.
pub async fn dead_worker_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A plain TCP echo server, used as the CONNECT tunnel's far end.
pub async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

/// Sends a plain proxied HTTP GET for `http://{target}/` through the load
/// balancer at `lb_addr` and returns the full response text.
pub async fn send_proxy_get(lb_addr: SocketAddr, target: SocketAddr) -> String {
    let mut stream = TcpStream::connect(lb_addr).await.unwrap();
    let request = format!(
        "GET http://{target}/ HTTP/1.1\r\nHost: {target}\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.shutdown().await.ok();

    let mut response = String::new();
    let mut buf = vec![0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => response.push_str(&String::from_utf8_lossy(&buf[..n])),
        }
    }
    response
}

pub fn response_body(response: &str) -> &str {
    response.split("\r\n\r\n").nth(1).unwrap_or("")
}

pub fn status_line(response: &str) -> &str {
    response.lines().next().unwrap_or("")
}
