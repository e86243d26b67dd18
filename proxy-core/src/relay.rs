//! `TunnelRelay`: bidirectional byte relay between two connected TCP streams,
//! with per-direction byte counters, an idle timeout, and a single terminal
//! outcome (SPEC_FULL.md §4.7). A two-task `tokio::join!`-joined pump loop,
//! one per direction, each under its own per-read idle timeout; no adaptive
//! buffer-pool machinery since this workload has no high-throughput
//! passthrough case to tune for.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use proxy_common::{ConnectionStatus, RelayError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

const BUFFER_SIZE: usize = 16 * 1024;

pub struct RelayOutcome {
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub status: ConnectionStatus,
    pub error_message: Option<String>,
}

/// Pipes `client` (A) <-> `upstream` (B) until both directions end. Read
/// chunks are written downstream before the next read is issued; no buffering
/// beyond transport-level buffers (spec.md §4.7).
pub async fn relay(client: TcpStream, upstream: TcpStream, idle_timeout: Duration) -> RelayOutcome {
    let (client_r, client_w) = client.into_split();
    let (upstream_r, upstream_w) = upstream.into_split();

    let bytes_up = Arc::new(AtomicU64::new(0));
    let bytes_down = Arc::new(AtomicU64::new(0));

    let up_task = pump(client_r, upstream_w, idle_timeout, bytes_up.clone());
    let down_task = pump(upstream_r, client_w, idle_timeout, bytes_down.clone());

    // Both directions always run to completion (not `try_join!`): when one
    // side half-closes cleanly, the other keeps draining until it too ends,
    // per spec.md's half-close requirement.
    let (up_result, down_result) = tokio::join!(up_task, down_task);

    let (status, error_message) = match (up_result, down_result) {
        (Err(RelayError::Timeout), _) | (_, Err(RelayError::Timeout)) => {
            (ConnectionStatus::Timeout, None)
        }
        (Err(e), _) => (ConnectionStatus::Error, Some(e.to_string())),
        (_, Err(e)) => (ConnectionStatus::Error, Some(e.to_string())),
        (Ok(()), Ok(())) => (ConnectionStatus::Success, None),
    };

    RelayOutcome {
        bytes_up: bytes_up.load(Ordering::Relaxed),
        bytes_down: bytes_down.load(Ordering::Relaxed),
        status,
        error_message,
    }
}

/// One direction of the duplex copy loop. Returns `Ok(())` on a clean EOF
/// (after propagating the half-close via `shutdown`), `Err(Timeout)` if no
/// data arrives within `idle`, `Err(Io(..))` on any read/write failure.
async fn pump(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    idle: Duration,
    counter: Arc<AtomicU64>,
) -> Result<(), RelayError> {
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = match tokio::time::timeout(idle, reader.read(&mut buf)).await {
            Ok(Ok(0)) => {
                // Write side is a no-op if already closed; ignore the error.
                let _ = writer.shutdown().await;
                return Ok(());
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(RelayError::Io(e)),
            Err(_) => return Err(RelayError::Timeout),
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            return Err(RelayError::Io(e));
        }
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let a = TcpStream::connect(addr).await.unwrap();
        let b = accept.await.unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn relays_bytes_in_both_directions_and_counts_them() {
        let (client, client_peer) = connected_pair().await;
        let (upstream, upstream_peer) = connected_pair().await;

        let relay_task = tokio::spawn(relay(client_peer, upstream_peer, Duration::from_secs(5)));

        let mut client = client;
        let mut upstream = upstream;

        client.write_all(b"request-bytes").await.unwrap();
        let mut got = [0u8; 13];
        upstream.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"request-bytes");

        upstream.write_all(b"response").await.unwrap();
        let mut got2 = [0u8; 8];
        client.read_exact(&mut got2).await.unwrap();
        assert_eq!(&got2, b"response");

        drop(client);
        drop(upstream);

        let outcome = relay_task.await.unwrap();
        assert_eq!(outcome.bytes_up, 13);
        assert_eq!(outcome.bytes_down, 8);
        assert_eq!(outcome.status, ConnectionStatus::Success);
    }

    #[tokio::test]
    async fn idle_timeout_finalizes_as_timeout() {
        let (client, client_peer) = connected_pair().await;
        let (upstream, upstream_peer) = connected_pair().await;
        // keep sockets alive for the duration of the test without sending data
        let _keepalive = (client, upstream);

        let outcome = relay(client_peer, upstream_peer, Duration::from_millis(50)).await;
        assert_eq!(outcome.status, ConnectionStatus::Timeout);
    }
}
