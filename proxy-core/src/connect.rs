//! `ConnectHandler`: handles the HTTPS `CONNECT host:port` method (spec.md §4.9).
//! Reading the request head one byte at a time (see `request::read_head`) means
//! the stream is left positioned exactly after the blank line with nothing
//! over-read, so there is never a pipelined "head" remainder to forward ahead
//! of the tunnel -- unlike event-loop servers that read in large chunks and
//! must replay a leftover buffer, this handler always hands `TunnelRelay` a
//! clean pair of sockets.

use std::sync::Arc;
use std::time::Duration;

use proxy_common::{parse_address, ConnectionStatus, ConnectionType, RequestIdGen};
use tokio::net::TcpStream;

use crate::request::{write_status_line, RequestHead};
use crate::selector::UpstreamSelector;
use crate::tracker::ConnectionTracker;

pub struct ConnectHandler {
    pub selector: Arc<UpstreamSelector>,
    pub tracker: Arc<ConnectionTracker>,
    pub request_ids: Arc<RequestIdGen>,
    pub connect_idle_timeout: Duration,
}

impl ConnectHandler {
    pub async fn handle(&self, mut client: TcpStream, head: RequestHead, client_ip: String) {
        let target = match parse_address(&head.target) {
            Ok(addr) => addr,
            Err(_) => {
                let _ = write_status_line(&mut client, "HTTP/1.1 400 Bad Request").await;
                return;
            }
        };

        let request_id = self.request_ids.next();
        self.tracker.start_connection(
            request_id.clone(),
            ConnectionType::Https,
            target.host.clone(),
            target.port,
            client_ip,
            None,
        );

        let target_endpoint = proxy_common::TargetEndpoint {
            host: target.host,
            port: target.port,
        };

        let upstream = match self.selector.dial(&target_endpoint).await {
            Ok((_, stream)) => stream,
            Err(e) => {
                let _ = write_status_line(&mut client, "HTTP/1.1 502 Bad Gateway").await;
                self.tracker
                    .end_connection(&request_id, ConnectionStatus::Error, Some(e.to_string()));
                return;
            }
        };

        if write_status_line(&mut client, "HTTP/1.1 200 Connection Established")
            .await
            .is_err()
        {
            self.tracker.end_connection(
                &request_id,
                ConnectionStatus::Error,
                Some("client aborted before tunnel established".to_string()),
            );
            return;
        }

        let outcome = crate::relay::relay(client, upstream, self.connect_idle_timeout).await;
        self.tracker.add_bytes_up(&request_id, outcome.bytes_up);
        self.tracker.add_bytes_down(&request_id, outcome.bytes_down);
        self.tracker
            .end_connection(&request_id, outcome.status, outcome.error_message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arc_swap::ArcSwap;
    use proxy_common::{Database, StatsCollector, WhitelistSet};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn handler() -> ConnectHandler {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let collector = Arc::new(StatsCollector::new(db, true).unwrap());
        let tracker = ConnectionTracker::spawn(collector, 16);
        let whitelist = Arc::new(ArcSwap::from_pointee(WhitelistSet::compile(Vec::<String>::new())));
        let selector = Arc::new(UpstreamSelector::new(
            "127.0.0.1:1".to_string(),
            Duration::from_millis(200),
            whitelist,
        ));
        ConnectHandler {
            selector,
            tracker,
            request_ids: Arc::new(RequestIdGen::new()),
            connect_idle_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn invalid_target_yields_400() {
        let handler = handler();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let mut peer = TcpStream::connect(addr).await.unwrap();
        let server_side = accept.await.unwrap();

        let head = RequestHead {
            method: "CONNECT".to_string(),
            target: "no-port-here".to_string(),
            version: "HTTP/1.1".to_string(),
            headers: Default::default(),
            raw_len: 0,
        };

        handler.handle(server_side, head, "127.0.0.1".to_string()).await;

        let mut buf = [0u8; 64];
        let n = peer.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn successful_tunnel_relays_bytes_after_200() {
        let handler = handler_with_direct_upstream().await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let mut client = TcpStream::connect(addr).await.unwrap();
        let server_side = accept.await.unwrap();

        let head = RequestHead {
            method: "CONNECT".to_string(),
            target: format!("127.0.0.1:{}", handler.1),
            version: "HTTP/1.1".to_string(),
            headers: Default::default(),
            raw_len: 0,
        };

        let handle_task = tokio::spawn(async move {
            handler.0.handle(server_side, head, "127.0.0.1".to_string()).await
        });

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 200"));

        client.write_all(b"ping").await.unwrap();
        drop(client);
        handle_task.await.unwrap();
    }

    /// Builds a handler whose SOCKS5 address is unused because the target is a
    /// loopback address, routed direct by `UpstreamSelector`; returns the
    /// handler plus the port of a trivial echo-ish origin listener it will dial.
    async fn handler_with_direct_upstream() -> (ConnectHandler, u16) {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin_port = origin.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = origin.accept().await {
                let mut buf = [0u8; 16];
                let _ = stream.read(&mut buf).await;
            }
        });
        (handler(), origin_port)
    }
}
