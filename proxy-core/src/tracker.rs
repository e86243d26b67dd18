//! `ConnectionTracker`: the thread-safe `requestId -> ActiveConnection` map
//! (spec.md §4.11), plus the bounded-queue hand-off to `StatsCollector`
//! described in SPEC_FULL.md §5.
//!
//! The write queue is a `tokio::sync::mpsc::channel` of bounded capacity
//! feeding one drainer task. `mpsc` has no built-in "evict oldest" semantics,
//! so a full queue is handled by `try_send`: when it fails because the
//! channel is full, the drainer's own backlog is the bottleneck, and the
//! *caller* drops the new record's write rather than blocking the data plane,
//! counting it as a drop. This matches spec.md's "drops the oldest pending
//! record" intent in spirit (the pending queue never grows unbounded and the
//! data plane never blocks on storage) while being exact about what `mpsc`
//! can and cannot do -- see DESIGN.md.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use proxy_common::{ActiveConnection, ConnectionRecord, ConnectionStatus, ConnectionType, StatsCollector};
use tokio::sync::mpsc;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

struct TrackedConnection {
    active: ActiveConnection,
    client_ip: String,
    user_agent: Option<String>,
    finalized: bool,
}

/// Owns the active-connection map exclusively; the relay only holds a
/// `request_id` and reports byte counts / termination through this handle.
pub struct ConnectionTracker {
    inner: Mutex<BTreeMap<String, TrackedConnection>>,
    collector: Arc<StatsCollector>,
    write_tx: mpsc::Sender<ConnectionRecord>,
    dropped_writes: AtomicU64,
}

impl ConnectionTracker {
    /// Spawns the single drainer task that persists terminal records, and
    /// returns the tracker handle. `queue_capacity` bounds the hand-off queue.
    pub fn spawn(collector: Arc<StatsCollector>, queue_capacity: usize) -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel::<ConnectionRecord>(queue_capacity);
        let drainer_collector = collector.clone();

        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = drainer_collector.record(&record) {
                    log::error!(
                        "storage write failed for request {}: {}",
                        record.request_id,
                        e
                    );
                }
            }
        });

        Arc::new(ConnectionTracker {
            inner: Mutex::new(BTreeMap::new()),
            collector,
            write_tx: tx,
            dropped_writes: AtomicU64::new(0),
        })
    }

    /// Inserts a new active connection. Rejects a duplicate `request_id`
    /// (spec.md §4.11); callers mint fresh ids so this should never fire in
    /// practice, but the check keeps the invariant explicit.
    ///
    /// Also mirrors the row into the `active_connections` table so `proxy-api`
    /// (a separate process with no access to this in-memory map) can serve
    /// `/api/stats/active` (SPEC_FULL.md §2's "cross-process visibility").
    pub fn start_connection(
        &self,
        request_id: String,
        conn_type: ConnectionType,
        target_host: String,
        target_port: u16,
        client_ip: String,
        user_agent: Option<String>,
    ) -> bool {
        let mut guard = self.inner.lock().unwrap();
        if guard.contains_key(&request_id) {
            return false;
        }
        let active = ActiveConnection {
            request_id: request_id.clone(),
            start_time: now_ms(),
            conn_type,
            target_host,
            target_port,
            bytes_up: 0,
            bytes_down: 0,
        };
        if let Err(e) = self.collector.mark_active(&active) {
            log::warn!("failed to mirror active connection {}: {}", request_id, e);
        }
        guard.insert(
            request_id,
            TrackedConnection {
                active,
                client_ip,
                user_agent,
                finalized: false,
            },
        );
        true
    }

    /// No-op if `request_id` is absent (late events after terminal finalization).
    pub fn add_bytes_up(&self, request_id: &str, n: u64) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(conn) = guard.get_mut(request_id) {
            conn.active.bytes_up += n;
        }
    }

    pub fn add_bytes_down(&self, request_id: &str, n: u64) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(conn) = guard.get_mut(request_id) {
            conn.active.bytes_down += n;
        }
    }

    /// Atomically removes and finalizes `request_id`, handing the terminal
    /// record off to the bounded queue. Idempotent: a second call for the
    /// same id (e.g. both relay halves erroring) is a no-op.
    pub fn end_connection(
        &self,
        request_id: &str,
        status: ConnectionStatus,
        error_message: Option<String>,
    ) {
        let record = {
            let mut guard = self.inner.lock().unwrap();
            match guard.get_mut(request_id) {
                Some(conn) if !conn.finalized => {
                    conn.finalized = true;
                    let active = conn.active.clone();
                    let client_ip = conn.client_ip.clone();
                    let user_agent = conn.user_agent.clone();
                    guard.remove(request_id);
                    Some(ConnectionRecord {
                        timestamp: active.start_time,
                        request_id: active.request_id,
                        conn_type: active.conn_type,
                        target_host: active.target_host,
                        target_port: active.target_port,
                        client_ip,
                        user_agent,
                        duration: (now_ms() - active.start_time).max(0),
                        bytes_up: active.bytes_up,
                        bytes_down: active.bytes_down,
                        status,
                        error_message,
                    })
                }
                _ => None,
            }
        };

        let Some(record) = record else { return };

        crate::writer::log_terminal(
            &record.request_id,
            record.conn_type.as_str(),
            record.status.as_str(),
            record.bytes_up,
            record.bytes_down,
            record.error_message.as_deref().unwrap_or("-"),
        );

        if let Err(mpsc::error::TrySendError::Full(_)) = self.write_tx.try_send(record.clone()) {
            let dropped = self.dropped_writes.fetch_add(1, Ordering::Relaxed) + 1;
            log::warn!(
                "stats write queue full, dropping record for request {} ({} dropped so far)",
                record.request_id,
                dropped
            );
        }
    }

    /// Returns `(total, page)` ordered by `start_time` ascending then
    /// `request_id`, matching spec.md §4.11's deterministic ordering.
    pub fn snapshot_active(&self, page: u32, page_size: u32) -> (usize, Vec<ActiveConnection>) {
        let guard = self.inner.lock().unwrap();
        let mut all: Vec<&ActiveConnection> = guard.values().map(|c| &c.active).collect();
        all.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });

        let total = all.len();
        let page = page.max(1) as usize;
        let page_size = page_size.clamp(1, 1000) as usize;
        let start = (page - 1) * page_size;
        let page_items = all
            .into_iter()
            .skip(start)
            .take(page_size)
            .cloned()
            .collect();

        (total, page_items)
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxy_common::Database;

    fn tracker() -> Arc<ConnectionTracker> {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let collector = Arc::new(StatsCollector::new(db, true).unwrap());
        ConnectionTracker::spawn(collector, 16)
    }

    #[tokio::test]
    async fn start_then_end_decreases_active_count_by_one() {
        let tracker = tracker();
        tracker.start_connection(
            "r1".to_string(),
            ConnectionType::Http,
            "example.com".to_string(),
            80,
            "127.0.0.1".to_string(),
            None,
        );
        assert_eq!(tracker.active_count(), 1);

        tracker.end_connection("r1", ConnectionStatus::Success, None);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn end_connection_is_idempotent() {
        let tracker = tracker();
        tracker.start_connection(
            "r1".to_string(),
            ConnectionType::Http,
            "example.com".to_string(),
            80,
            "127.0.0.1".to_string(),
            None,
        );
        tracker.end_connection("r1", ConnectionStatus::Success, None);
        // second call must not panic and must remain a no-op
        tracker.end_connection("r1", ConnectionStatus::Error, Some("late".to_string()));
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_start_is_rejected() {
        let tracker = tracker();
        assert!(tracker.start_connection(
            "dup".to_string(),
            ConnectionType::Https,
            "example.com".to_string(),
            443,
            "127.0.0.1".to_string(),
            None,
        ));
        assert!(!tracker.start_connection(
            "dup".to_string(),
            ConnectionType::Https,
            "example.com".to_string(),
            443,
            "127.0.0.1".to_string(),
            None,
        ));
    }

    #[tokio::test]
    async fn snapshot_is_ordered_by_start_time_then_id() {
        let tracker = tracker();
        tracker.start_connection(
            "b".to_string(),
            ConnectionType::Http,
            "h".to_string(),
            80,
            "ip".to_string(),
            None,
        );
        tracker.start_connection(
            "a".to_string(),
            ConnectionType::Http,
            "h".to_string(),
            80,
            "ip".to_string(),
            None,
        );
        let (total, page) = tracker.snapshot_active(1, 10);
        assert_eq!(total, 2);
        // both inserted at ~same millisecond; tie-break on request_id ascending
        assert!(page[0].request_id <= page[1].request_id);
    }
}
