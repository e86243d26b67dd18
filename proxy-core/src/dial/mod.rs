//! `SocksDialer` and `DirectDialer`: both yield a plain `tokio::net::TcpStream`
//! so `TunnelRelay` and `HttpForwarder`'s SOCKS5 path are oblivious to which
//! dialer produced the socket (SPEC_FULL.md §4).

pub mod direct;
pub mod socks;

use std::time::Duration;

use proxy_common::error::DialError;
use tokio::net::TcpStream;

/// Opens a plain TCP connection to `(host, port)`, bounded by `timeout`.
pub async fn dial_direct(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, DialError> {
    direct::dial(host, port, timeout).await
}

/// Opens a TCP stream to `(host, port)` via a SOCKS5 proxy's CONNECT command,
/// bounded by `timeout` for both the dial and the handshake.
pub async fn dial_socks5(
    socks_addr: &str,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<TcpStream, DialError> {
    socks::connect(socks_addr, host, port, timeout).await
}
