//! Direct TCP dialing, bypassing the upstream SOCKS5 proxy. DNS resolution uses
//! the host runtime's resolver (`tokio::net::TcpStream::connect` delegates to
//! `ToSocketAddrs`, which shells out to the system resolver).

use std::time::Duration;

use proxy_common::error::DialError;
use tokio::net::TcpStream;

pub async fn dial(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, DialError> {
    let target = format!("{}:{}", host, port);
    match tokio::time::timeout(timeout, TcpStream::connect(&target)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(DialError::Io(e)),
        Err(_) => Err(DialError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn dials_a_listening_loopback_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await });

        let stream = dial("127.0.0.1", addr.port(), Duration::from_secs(2))
            .await
            .expect("dial should succeed");
        assert!(stream.peer_addr().is_ok());
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn times_out_against_a_non_routable_address() {
        // TEST-NET-1 reserved for documentation; expected to black-hole.
        let result = dial("192.0.2.1", 81, Duration::from_millis(50)).await;
        assert!(result.is_err());
    }
}
