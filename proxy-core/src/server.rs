//! `ProxyServer`: the TCP listener and per-connection request demultiplexer
//! (spec.md §4.10). A plain bind-then-spawn-per-connection accept loop; no
//! multi-service launch machinery, since this server only ever runs one
//! plain-HTTP listener.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use crate::connect::ConnectHandler;
use crate::forward::HttpForwarder;
use crate::request::read_head;

pub struct ProxyServer {
    pub forwarder: Arc<HttpForwarder>,
    pub connect_handler: Arc<ConnectHandler>,
    pub drain_deadline: Duration,
}

impl ProxyServer {
    /// Accepts connections on `addr` until `shutdown` is notified, then stops
    /// accepting and waits up to `drain_deadline` for in-flight tasks before
    /// returning (spec.md §4.10's graceful-shutdown contract).
    pub async fn run(&self, addr: &str, shutdown: Arc<Notify>) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("proxy listening on {}", addr);

        let in_flight = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    log::info!("shutdown signal received, draining in-flight connections");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            log::warn!("accept failed: {}", e);
                            continue;
                        }
                    };

                    let forwarder = self.forwarder.clone();
                    let connect_handler = self.connect_handler.clone();
                    let in_flight = in_flight.clone();
                    let idle = idle.clone();
                    in_flight.fetch_add(1, Ordering::SeqCst);

                    tokio::spawn(async move {
                        handle_connection(stream, peer.ip().to_string(), forwarder, connect_handler).await;
                        if in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                            idle.notify_waiters();
                        }
                    });
                }
            }
        }

        if in_flight.load(Ordering::SeqCst) > 0 {
            let drained = tokio::time::timeout(self.drain_deadline, idle.notified()).await;
            if drained.is_err() {
                log::warn!(
                    "drain deadline elapsed with {} connection(s) still active; forcing close",
                    in_flight.load(Ordering::SeqCst)
                );
            }
        }

        Ok(())
    }
}

/// A failure here never escapes to another connection's task (spec.md §7's
/// propagation policy): every path below either writes an error status and
/// returns, or logs and returns.
async fn handle_connection(
    mut stream: TcpStream,
    client_ip: String,
    forwarder: Arc<HttpForwarder>,
    connect_handler: Arc<ConnectHandler>,
) {
    let head = match read_head(&mut stream).await {
        Ok(head) => head,
        Err(e) => {
            log::debug!("discarding connection from {}: {}", client_ip, e);
            return;
        }
    };

    if head.method.eq_ignore_ascii_case("CONNECT") {
        connect_handler.handle(stream, head, client_ip).await;
    } else {
        forwarder.handle(stream, head, client_ip).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arc_swap::ArcSwap;
    use proxy_common::{Database, RequestIdGen, StatsCollector, WhitelistSet};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn test_server() -> (ProxyServer, String) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let collector = Arc::new(StatsCollector::new(db, true).unwrap());
        let tracker = crate::tracker::ConnectionTracker::spawn(collector, 16);
        let whitelist = Arc::new(ArcSwap::from_pointee(WhitelistSet::compile(Vec::<String>::new())));
        let selector = Arc::new(crate::selector::UpstreamSelector::new(
            "127.0.0.1:1".to_string(),
            Duration::from_millis(200),
            whitelist,
        ));
        let request_ids = Arc::new(RequestIdGen::new());

        let forwarder = Arc::new(HttpForwarder {
            selector: selector.clone(),
            tracker: tracker.clone(),
            request_ids: request_ids.clone(),
            http_idle_timeout: Duration::from_secs(1),
            direct_client: crate::forward::direct_http_client(),
        });
        let connect_handler = Arc::new(ConnectHandler {
            selector,
            tracker,
            request_ids,
            connect_idle_timeout: Duration::from_secs(1),
        });

        let server = ProxyServer {
            forwarder,
            connect_handler,
            drain_deadline: Duration::from_millis(200),
        };
        (server, "127.0.0.1:0".to_string())
    }

    #[tokio::test]
    async fn rejects_a_connect_with_invalid_target() {
        let (server, bind_addr) = test_server().await;
        let listener = TcpListener::bind(&bind_addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let shutdown = Arc::new(Notify::new());
        let shutdown_clone = shutdown.clone();
        let server_task = tokio::spawn(async move { server.run(&addr.to_string(), shutdown_clone).await });

        // give the listener a moment to bind
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"CONNECT not-a-valid-target HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 400"));

        shutdown.notify_waiters();
        let _ = server_task.await;
    }
}
