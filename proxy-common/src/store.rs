//! `rusqlite`-backed storage for terminal connection records, the live active-set
//! mirror, and the blocklist/whitelist administrative overlays.
//!
//! A path-parameterized `execute`/`query`/`query_one`/`transaction` wrapper
//! around a single pooled connection, shared by both binaries.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::{params_from_iter, Connection, Result as SqliteResult, ToSql};

use crate::error::StoreError;
use crate::model::{ActiveConnection, ConnectionRecord, ConnectionStatus, ConnectionType};

pub type StoreResult<T> = Result<T, StoreError>;

/// A thread-safe wrapper around a SQLite connection, shareable between the
/// bounded-queue drainer task and (read-only, via its own handle) the API
/// server.
pub struct Database {
    connection: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (creating if absent) the SQLite file at `path`, creating parent
    /// directories as needed.
    pub fn new(path: &str) -> StoreResult<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let connection = Connection::open(path)?;
        Ok(Database {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Opens an in-memory database, used by tests in place of a file path.
    pub fn open_in_memory() -> StoreResult<Self> {
        let connection = Connection::open_in_memory()?;
        Ok(Database {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    pub fn execute<P>(&self, sql: &str, params: P) -> StoreResult<usize>
    where
        P: rusqlite::Params,
    {
        let conn = self
            .connection
            .lock()
            .map_err(|_| StoreError::NotInitialized)?;
        Ok(conn.execute(sql, params)?)
    }

    pub fn query<T, F, P>(&self, sql: &str, params: P, f: F) -> StoreResult<Vec<T>>
    where
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
        P: rusqlite::Params,
    {
        let conn = self
            .connection
            .lock()
            .map_err(|_| StoreError::NotInitialized)?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, f)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn query_one<T, F, P>(&self, sql: &str, params: P, f: F) -> StoreResult<Option<T>>
    where
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
        P: rusqlite::Params,
    {
        let conn = self
            .connection
            .lock()
            .map_err(|_| StoreError::NotInitialized)?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query_map(params, f)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn transaction<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> SqliteResult<T>,
    {
        let mut conn = self
            .connection
            .lock()
            .map_err(|_| StoreError::NotInitialized)?;
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

/// A dynamically-typed SQL parameter for building filter clauses whose shape
/// isn't known until the query runs.
enum SqlValue {
    Text(String),
    Int(i64),
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqlValue::Text(s) => Ok(ToSqlOutput::Owned(Value::Text(s.clone()))),
            SqlValue::Int(i) => Ok(ToSqlOutput::Owned(Value::Integer(*i))),
        }
    }
}

/// Filter fields for `StatsCollector::get_stats`. `host` is a substring match,
/// case preserved.
#[derive(Debug, Clone, Default)]
pub struct StatsFilter {
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub host: Option<String>,
    pub conn_type: Option<ConnectionType>,
}

impl StatsFilter {
    fn clauses(&self) -> (String, Vec<SqlValue>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(start) = self.start_time {
            clauses.push("timestamp >= ?".to_string());
            values.push(SqlValue::Int(start));
        }
        if let Some(end) = self.end_time {
            clauses.push("timestamp <= ?".to_string());
            values.push(SqlValue::Int(end));
        }
        if let Some(host) = &self.host {
            clauses.push("target_host LIKE ?".to_string());
            values.push(SqlValue::Text(format!("%{}%", host)));
        }
        if let Some(conn_type) = self.conn_type {
            clauses.push("type = ?".to_string());
            values.push(SqlValue::Text(conn_type.as_str().to_string()));
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!("WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

/// `page >= 1`, `page_size` clamped to `[1,1000]`.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    pub fn new(page: u32, page_size: u32) -> Self {
        Pagination {
            page: page.max(1),
            page_size: page_size.clamp(1, 1000),
        }
    }

    fn offset(&self) -> u32 {
        (self.page - 1) * self.page_size
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination::new(1, 10)
    }
}

#[derive(Debug, Clone)]
pub struct TopHost {
    pub host: String,
    pub count: u64,
    pub sum_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct StatsTotals {
    pub total_requests: u64,
    pub total_bytes_up: u64,
    pub total_bytes_down: u64,
    pub avg_duration: f64,
}

#[derive(Debug, Clone)]
pub struct PaginationResult {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone)]
pub struct StatsPage {
    pub totals: StatsTotals,
    pub top_hosts: Vec<TopHost>,
    pub records: Vec<ConnectionRecord>,
    pub pagination: PaginationResult,
}

#[derive(Debug, Clone)]
pub struct ActivePage {
    pub total: u64,
    pub records: Vec<ActiveConnection>,
}

/// Persists terminal `ConnectionRecord`s, mirrors the live active set for
/// cross-process visibility, and answers the aggregate/active/blocklist
/// queries the API surface needs.
///
/// Writes are best-effort: a storage failure is logged by the caller (the
/// bounded-queue drainer in `proxy-core`) and never propagates back to the data
/// plane.
pub struct StatsCollector {
    database: Arc<Database>,
    enabled: bool,
}

impl StatsCollector {
    pub fn new(database: Arc<Database>, enabled: bool) -> StoreResult<Self> {
        let collector = StatsCollector { database, enabled };
        if collector.enabled {
            collector.ensure_schema()?;
        }
        Ok(collector)
    }

    fn ensure_schema(&self) -> StoreResult<()> {
        self.database.execute(
            "CREATE TABLE IF NOT EXISTS access_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                request_id TEXT NOT NULL UNIQUE,
                type TEXT NOT NULL,
                target_host TEXT NOT NULL,
                target_port INTEGER NOT NULL,
                client_ip TEXT NOT NULL,
                user_agent TEXT,
                duration INTEGER NOT NULL,
                bytes_up INTEGER NOT NULL,
                bytes_down INTEGER NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT
            )",
            [],
        )?;
        self.database.execute(
            "CREATE INDEX IF NOT EXISTS idx_access_logs_timestamp ON access_logs(timestamp)",
            [],
        )?;
        self.database.execute(
            "CREATE INDEX IF NOT EXISTS idx_access_logs_host ON access_logs(target_host)",
            [],
        )?;
        self.database.execute(
            "CREATE INDEX IF NOT EXISTS idx_access_logs_type ON access_logs(type)",
            [],
        )?;
        self.database.execute(
            "CREATE INDEX IF NOT EXISTS idx_access_logs_status ON access_logs(status)",
            [],
        )?;
        self.database.execute(
            "CREATE TABLE IF NOT EXISTS active_connections (
                request_id TEXT PRIMARY KEY,
                start_time INTEGER NOT NULL,
                type TEXT NOT NULL,
                target_host TEXT NOT NULL,
                target_port INTEGER NOT NULL,
                bytes_up INTEGER NOT NULL,
                bytes_down INTEGER NOT NULL
            )",
            [],
        )?;
        self.database.execute(
            "CREATE TABLE IF NOT EXISTS blocklist (
                domain TEXT NOT NULL UNIQUE,
                comment TEXT
            )",
            [],
        )?;
        self.database.execute(
            "CREATE TABLE IF NOT EXISTS whitelist_overlay (
                domain TEXT NOT NULL UNIQUE
            )",
            [],
        )?;
        Ok(())
    }

    /// Inserts (or replaces) the live-active mirror row for `conn`. A no-op when
    /// persistence is disabled.
    pub fn mark_active(&self, conn: &ActiveConnection) -> StoreResult<()> {
        if !self.enabled {
            return Ok(());
        }
        self.database.execute(
            "INSERT OR REPLACE INTO active_connections
                (request_id, start_time, type, target_host, target_port, bytes_up, bytes_down)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                conn.request_id,
                conn.start_time,
                conn.conn_type.as_str(),
                conn.target_host,
                conn.target_port,
                conn.bytes_up,
                conn.bytes_down,
            ],
        )?;
        Ok(())
    }

    /// Removes the live-active mirror row for `request_id`. Idempotent.
    pub fn clear_active(&self, request_id: &str) -> StoreResult<()> {
        if !self.enabled {
            return Ok(());
        }
        self.database.execute(
            "DELETE FROM active_connections WHERE request_id = ?1",
            rusqlite::params![request_id],
        )?;
        Ok(())
    }

    /// Appends a terminal record. `INSERT OR IGNORE` on `request_id` makes a
    /// duplicate call for an already-finalized request a no-op, matching
    /// `endConnection`'s idempotence requirement.
    pub fn record(&self, record: &ConnectionRecord) -> StoreResult<()> {
        if !self.enabled {
            return Ok(());
        }
        self.database.execute(
            "INSERT OR IGNORE INTO access_logs
                (timestamp, request_id, type, target_host, target_port, client_ip,
                 user_agent, duration, bytes_up, bytes_down, status, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                record.timestamp,
                record.request_id,
                record.conn_type.as_str(),
                record.target_host,
                record.target_port,
                record.client_ip,
                record.user_agent,
                record.duration,
                record.bytes_up,
                record.bytes_down,
                record.status.as_str(),
                record.error_message,
            ],
        )?;
        self.clear_active(&record.request_id)?;
        Ok(())
    }

    /// When persistence is disabled, returns a well-formed empty response with
    /// zeroed totals, per spec.
    pub fn get_stats(&self, filter: &StatsFilter, pagination: Pagination) -> StoreResult<StatsPage> {
        if !self.enabled {
            return Ok(StatsPage {
                totals: StatsTotals::default(),
                top_hosts: Vec::new(),
                records: Vec::new(),
                pagination: PaginationResult {
                    page: pagination.page,
                    page_size: pagination.page_size,
                    total: 0,
                    total_pages: 0,
                },
            });
        }

        let (where_clause, values) = filter.clauses();

        let totals_sql = format!(
            "SELECT COUNT(*), COALESCE(SUM(bytes_up),0), COALESCE(SUM(bytes_down),0), COALESCE(AVG(duration),0.0)
             FROM access_logs {}",
            where_clause
        );
        let totals = self
            .database
            .query_one(&totals_sql, params_from_iter(values.iter()), |row| {
                Ok(StatsTotals {
                    total_requests: row.get::<_, i64>(0)? as u64,
                    total_bytes_up: row.get::<_, i64>(1)? as u64,
                    total_bytes_down: row.get::<_, i64>(2)? as u64,
                    avg_duration: row.get::<_, f64>(3)?,
                })
            })?
            .unwrap_or_default();

        let top_hosts_sql = format!(
            "SELECT target_host, COUNT(*) c, COALESCE(SUM(bytes_up+bytes_down),0) s
             FROM access_logs {}
             GROUP BY target_host
             ORDER BY c DESC, target_host ASC
             LIMIT 10",
            where_clause
        );
        let top_hosts = self
            .database
            .query(&top_hosts_sql, params_from_iter(values.iter()), |row| {
                Ok(TopHost {
                    host: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                    sum_bytes: row.get::<_, i64>(2)? as u64,
                })
            })?;

        let mut record_values = values.clone_values();
        record_values.push(SqlValue::Int(pagination.page_size as i64));
        record_values.push(SqlValue::Int(pagination.offset() as i64));
        let records_sql = format!(
            "SELECT timestamp, request_id, type, target_host, target_port, client_ip,
                    user_agent, duration, bytes_up, bytes_down, status, error_message
             FROM access_logs {}
             ORDER BY timestamp DESC
             LIMIT ? OFFSET ?",
            where_clause
        );
        let records = self
            .database
            .query(&records_sql, params_from_iter(record_values.iter()), row_to_record)?;

        let total = totals.total_requests;
        let total_pages = if total == 0 {
            0
        } else {
            (total + pagination.page_size as u64 - 1) / pagination.page_size as u64
        };

        Ok(StatsPage {
            totals,
            top_hosts,
            records,
            pagination: PaginationResult {
                page: pagination.page,
                page_size: pagination.page_size,
                total,
                total_pages,
            },
        })
    }

    /// Active-connection queries do not consult storage when persistence is
    /// disabled either, but they are cheap enough (a single small table) that
    /// the "well-formed empty response" rule still applies the same way.
    pub fn get_active(&self, pagination: Pagination) -> StoreResult<ActivePage> {
        if !self.enabled {
            return Ok(ActivePage {
                total: 0,
                records: Vec::new(),
            });
        }

        let total = self
            .database
            .query_one(
                "SELECT COUNT(*) FROM active_connections",
                [],
                |row| row.get::<_, i64>(0),
            )?
            .unwrap_or(0) as u64;

        let records = self.database.query(
            "SELECT request_id, start_time, type, target_host, target_port, bytes_up, bytes_down
             FROM active_connections
             ORDER BY start_time ASC, request_id ASC
             LIMIT ?1 OFFSET ?2",
            rusqlite::params![pagination.page_size, pagination.offset()],
            |row| {
                let type_str: String = row.get(2)?;
                Ok(ActiveConnection {
                    request_id: row.get(0)?,
                    start_time: row.get(1)?,
                    conn_type: if type_str == "HTTPS" {
                        ConnectionType::Https
                    } else {
                        ConnectionType::Http
                    },
                    target_host: row.get(3)?,
                    target_port: row.get(4)?,
                    bytes_up: row.get::<_, i64>(5)? as u64,
                    bytes_down: row.get::<_, i64>(6)? as u64,
                })
            },
        )?;

        Ok(ActivePage { total, records })
    }

    pub fn active_count(&self) -> StoreResult<u64> {
        if !self.enabled {
            return Ok(0);
        }
        Ok(self
            .database
            .query_one("SELECT COUNT(*) FROM active_connections", [], |row| {
                row.get::<_, i64>(0)
            })?
            .unwrap_or(0) as u64)
    }

    pub fn get_blocklist(&self) -> StoreResult<Vec<String>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        self.database
            .query("SELECT domain FROM blocklist ORDER BY domain ASC", [], |row| row.get(0))
    }

    /// Transactional replace: truncates and re-inserts within a single
    /// transaction, rolling back on any error.
    pub fn replace_blocklist(&self, domains: &[String]) -> StoreResult<Vec<String>> {
        if !self.enabled {
            return Ok(domains.to_vec());
        }
        self.database.transaction(|conn| {
            conn.execute("DELETE FROM blocklist", [])?;
            for domain in domains {
                conn.execute(
                    "INSERT INTO blocklist (domain) VALUES (?1)",
                    rusqlite::params![domain],
                )?;
            }
            Ok(())
        })?;
        Ok(domains.to_vec())
    }

    pub fn get_whitelist_overlay(&self) -> StoreResult<Vec<String>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        self.database.query(
            "SELECT domain FROM whitelist_overlay ORDER BY domain ASC",
            [],
            |row| row.get(0),
        )
    }

    /// `editDomainWhitelist` from spec.md §4.12: an administrative overlay only,
    /// never consulted by `UpstreamSelector` (see DESIGN.md).
    pub fn replace_whitelist_overlay(&self, domains: &[String]) -> StoreResult<Vec<String>> {
        if !self.enabled {
            return Ok(domains.to_vec());
        }
        self.database.transaction(|conn| {
            conn.execute("DELETE FROM whitelist_overlay", [])?;
            for domain in domains {
                conn.execute(
                    "INSERT INTO whitelist_overlay (domain) VALUES (?1)",
                    rusqlite::params![domain],
                )?;
            }
            Ok(())
        })?;
        Ok(domains.to_vec())
    }
}

trait CloneValues {
    fn clone_values(&self) -> Vec<SqlValue>;
}

impl CloneValues for Vec<SqlValue> {
    fn clone_values(&self) -> Vec<SqlValue> {
        self.iter()
            .map(|v| match v {
                SqlValue::Text(s) => SqlValue::Text(s.clone()),
                SqlValue::Int(i) => SqlValue::Int(*i),
            })
            .collect()
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConnectionRecord> {
    let type_str: String = row.get(2)?;
    let status_str: String = row.get(10)?;
    Ok(ConnectionRecord {
        timestamp: row.get(0)?,
        request_id: row.get(1)?,
        conn_type: if type_str == "HTTPS" {
            ConnectionType::Https
        } else {
            ConnectionType::Http
        },
        target_host: row.get(3)?,
        target_port: row.get(4)?,
        client_ip: row.get(5)?,
        user_agent: row.get(6)?,
        duration: row.get(7)?,
        bytes_up: row.get::<_, i64>(8)? as u64,
        bytes_down: row.get::<_, i64>(9)? as u64,
        status: match status_str.as_str() {
            "error" => ConnectionStatus::Error,
            "timeout" => ConnectionStatus::Timeout,
            _ => ConnectionStatus::Success,
        },
        error_message: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(request_id: &str, host: &str, up: u64, down: u64, duration: i64) -> ConnectionRecord {
        ConnectionRecord {
            timestamp: 1_000,
            request_id: request_id.to_string(),
            conn_type: ConnectionType::Http,
            target_host: host.to_string(),
            target_port: 80,
            client_ip: "127.0.0.1".to_string(),
            user_agent: None,
            duration,
            bytes_up: up,
            bytes_down: down,
            status: ConnectionStatus::Success,
            error_message: None,
        }
    }

    #[test]
    fn stats_aggregation_matches_scenario_six() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let collector = StatsCollector::new(db, true).unwrap();

        collector.record(&sample_record("r1", "a", 100, 200, 10)).unwrap();
        collector.record(&sample_record("r2", "a", 0, 50, 20)).unwrap();
        collector.record(&sample_record("r3", "b", 10, 10, 30)).unwrap();

        let page = collector
            .get_stats(&StatsFilter::default(), Pagination::new(1, 10))
            .unwrap();

        assert_eq!(page.totals.total_requests, 3);
        assert_eq!(page.totals.total_bytes_up, 110);
        assert_eq!(page.totals.total_bytes_down, 260);
        assert!((page.totals.avg_duration - 20.0).abs() < f64::EPSILON);

        assert_eq!(page.top_hosts.len(), 2);
        assert_eq!(page.top_hosts[0].host, "a");
        assert_eq!(page.top_hosts[0].count, 2);
        assert_eq!(page.top_hosts[0].sum_bytes, 350);
        assert_eq!(page.top_hosts[1].host, "b");
        assert_eq!(page.top_hosts[1].count, 1);

        assert_eq!(page.pagination.total, 3);
        assert_eq!(page.pagination.total_pages, 1);
    }

    #[test]
    fn double_record_is_idempotent() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let collector = StatsCollector::new(db, true).unwrap();
        let record = sample_record("dup", "a", 1, 1, 1);

        collector.record(&record).unwrap();
        collector.record(&record).unwrap();

        let page = collector
            .get_stats(&StatsFilter::default(), Pagination::new(1, 10))
            .unwrap();
        assert_eq!(page.totals.total_requests, 1);
    }

    #[test]
    fn disabled_persistence_returns_zeroed_response() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let collector = StatsCollector::new(db, false).unwrap();

        let page = collector
            .get_stats(&StatsFilter::default(), Pagination::new(1, 10))
            .unwrap();
        assert_eq!(page.totals.total_requests, 0);
        assert!(page.records.is_empty());
    }

    #[test]
    fn blocklist_replace_is_transactional() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let collector = StatsCollector::new(db, true).unwrap();

        collector
            .replace_blocklist(&["evil.example".to_string(), "bad.example".to_string()])
            .unwrap();
        let domains = collector.get_blocklist().unwrap();
        assert_eq!(domains, vec!["bad.example".to_string(), "evil.example".to_string()]);

        collector.replace_blocklist(&["only.example".to_string()]).unwrap();
        let domains = collector.get_blocklist().unwrap();
        assert_eq!(domains, vec!["only.example".to_string()]);
    }

    #[test]
    fn active_mirror_round_trips() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let collector = StatsCollector::new(db, true).unwrap();

        let active = ActiveConnection {
            request_id: "r1".to_string(),
            start_time: 100,
            conn_type: ConnectionType::Https,
            target_host: "example.com".to_string(),
            target_port: 443,
            bytes_up: 10,
            bytes_down: 0,
        };
        collector.mark_active(&active).unwrap();
        assert_eq!(collector.active_count().unwrap(), 1);

        collector.clear_active("r1").unwrap();
        assert_eq!(collector.active_count().unwrap(), 0);
    }
}
