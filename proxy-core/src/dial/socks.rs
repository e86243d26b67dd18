//! A hand-rolled SOCKS5 (RFC 1928) client, CONNECT command only, NO AUTH.
//! No SOCKS5 client crate is pulled in for this narrow need; the handshake is
//! written directly against `tokio::net::TcpStream`, the same way an HTTP
//! CONNECT request gets hand-written over a raw socket elsewhere when a full
//! client is overkill for a few framed bytes.

use std::net::IpAddr;
use std::time::Duration;

use proxy_common::error::DialError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NO_ACCEPTABLE: u8 = 0xff;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const REP_SUCCESS: u8 = 0x00;

pub async fn connect(
    socks_addr: &str,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<TcpStream, DialError> {
    let handshake = async {
        let mut stream = TcpStream::connect(socks_addr).await?;
        greet(&mut stream).await?;
        request_connect(&mut stream, host, port).await?;
        Ok::<TcpStream, DialError>(stream)
    };

    match tokio::time::timeout(timeout, handshake).await {
        Ok(result) => result,
        Err(_) => Err(DialError::Timeout),
    }
}

async fn greet(stream: &mut TcpStream) -> Result<(), DialError> {
    stream
        .write_all(&[VERSION, 0x01, METHOD_NO_AUTH])
        .await
        .map_err(DialError::Io)?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.map_err(DialError::Io)?;

    if reply[0] != VERSION {
        return Err(DialError::SocksProtocol(format!(
            "unexpected SOCKS version {:#x} in greeting reply",
            reply[0]
        )));
    }
    match reply[1] {
        METHOD_NO_AUTH => Ok(()),
        METHOD_NO_ACCEPTABLE => Err(DialError::SocksProtocol(
            "upstream has no acceptable auth method for NO AUTH".to_string(),
        )),
        other => Err(DialError::SocksProtocol(format!(
            "upstream selected unsupported auth method {:#x}",
            other
        ))),
    }
}

async fn request_connect(stream: &mut TcpStream, host: &str, port: u16) -> Result<(), DialError> {
    let mut request = vec![VERSION, CMD_CONNECT, 0x00];
    encode_address(&mut request, host, port)?;
    stream.write_all(&request).await.map_err(DialError::Io)?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.map_err(DialError::Io)?;

    if header[0] != VERSION {
        return Err(DialError::SocksProtocol(format!(
            "unexpected SOCKS version {:#x} in CONNECT reply",
            header[0]
        )));
    }

    let rep = header[1];

    // Drain the bound address the server reports, regardless of outcome; the
    // byte layout depends on ATYP and must be consumed to leave the stream at
    // the start of the proxied payload.
    match header[3] {
        ATYP_IPV4 => {
            let mut addr = [0u8; 4 + 2];
            stream.read_exact(&mut addr).await.map_err(DialError::Io)?;
        }
        ATYP_IPV6 => {
            let mut addr = [0u8; 16 + 2];
            stream.read_exact(&mut addr).await.map_err(DialError::Io)?;
        }
        ATYP_DOMAIN => {
            let mut len_byte = [0u8; 1];
            stream.read_exact(&mut len_byte).await.map_err(DialError::Io)?;
            let mut addr = vec![0u8; len_byte[0] as usize + 2];
            stream.read_exact(&mut addr).await.map_err(DialError::Io)?;
        }
        other => {
            return Err(DialError::SocksProtocol(format!(
                "unsupported ATYP {:#x} in CONNECT reply",
                other
            )))
        }
    }

    if rep != REP_SUCCESS {
        return Err(DialError::SocksReject(rep));
    }

    Ok(())
}

/// Encodes the destination address, preferring `ATYP_DOMAIN` for hostnames so
/// the upstream SOCKS5 server performs the resolution (spec.md §4.4).
fn encode_address(out: &mut Vec<u8>, host: &str, port: u16) -> Result<(), DialError> {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            out.push(ATYP_IPV4);
            out.extend_from_slice(&v4.octets());
        }
        Ok(IpAddr::V6(v6)) => {
            out.push(ATYP_IPV6);
            out.extend_from_slice(&v6.octets());
        }
        Err(_) => {
            if host.len() > 255 {
                return Err(DialError::SocksProtocol(format!(
                    "domain name '{}' exceeds 255 bytes",
                    host
                )));
            }
            out.push(ATYP_DOMAIN);
            out.push(host.len() as u8);
            out.extend_from_slice(host.as_bytes());
        }
    }
    out.extend_from_slice(&port.to_be_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn encodes_ipv4_literal_as_atyp_ipv4() {
        let mut out = Vec::new();
        encode_address(&mut out, "127.0.0.1", 80).unwrap();
        assert_eq!(out, vec![ATYP_IPV4, 127, 0, 0, 1, 0, 80]);
    }

    #[test]
    fn encodes_hostname_as_atyp_domain() {
        let mut out = Vec::new();
        encode_address(&mut out, "example.com", 443).unwrap();
        assert_eq!(out[0], ATYP_DOMAIN);
        assert_eq!(out[1], 11);
        assert_eq!(&out[2..13], b"example.com");
        assert_eq!(&out[13..15], &443u16.to_be_bytes());
    }

    #[test]
    fn encodes_ipv6_literal_as_atyp_ipv6() {
        let mut out = Vec::new();
        encode_address(&mut out, "::1", 22).unwrap();
        assert_eq!(out[0], ATYP_IPV6);
        assert_eq!(out.len(), 1 + 16 + 2);
    }

    /// A minimal in-test SOCKS5 stub: accepts one connection, performs the
    /// NO AUTH greeting, reads a CONNECT request, and replies with `rep`.
    async fn stub_socks_server(rep: u8) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut greeting = [0u8; 3];
            stream.read_exact(&mut greeting).await.unwrap();
            stream.write_all(&[VERSION, METHOD_NO_AUTH]).await.unwrap();

            let mut head = [0u8; 4];
            stream.read_exact(&mut head).await.unwrap();
            match head[3] {
                ATYP_DOMAIN => {
                    let mut len = [0u8; 1];
                    stream.read_exact(&mut len).await.unwrap();
                    let mut rest = vec![0u8; len[0] as usize + 2];
                    stream.read_exact(&mut rest).await.unwrap();
                }
                ATYP_IPV4 => {
                    let mut rest = [0u8; 6];
                    stream.read_exact(&mut rest).await.unwrap();
                }
                _ => {}
            }

            stream
                .write_all(&[VERSION, rep, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn successful_connect_yields_a_connected_stream() {
        let addr = stub_socks_server(REP_SUCCESS).await;
        let stream = connect(&addr.to_string(), "example.com", 80, Duration::from_secs(2))
            .await
            .expect("connect should succeed");
        assert!(stream.peer_addr().is_ok());
    }

    #[tokio::test]
    async fn non_zero_rep_is_surfaced_as_reject() {
        let addr = stub_socks_server(0x05).await; // connection refused
        let err = connect(&addr.to_string(), "down.example", 80, Duration::from_secs(2))
            .await
            .expect_err("connect should fail");
        match err {
            DialError::SocksReject(code) => assert_eq!(code, 0x05),
            other => panic!("expected SocksReject, got {:?}", other),
        }
    }
}
