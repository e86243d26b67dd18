//! The value types that flow between the proxy data plane and the stats store.

use serde::{Deserialize, Serialize};

/// The target of a forwarded request, derived from the absolute URI (HTTP) or the
/// CONNECT target (HTTPS). `host` may be a DNS name, IPv4 literal, or IPv6 literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEndpoint {
    pub host: String,
    pub port: u16,
}

/// Whether a request is routed directly or through the upstream SOCKS5 proxy.
/// Determined once per request and never reconsidered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamDecision {
    Direct,
    ViaSocks5,
}

/// HTTP vs. HTTPS (CONNECT) request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionType {
    Http,
    Https,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Http => "HTTP",
            ConnectionType::Https => "HTTPS",
        }
    }
}

/// Terminal outcome of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Success,
    Error,
    Timeout,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Success => "success",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Timeout => "timeout",
        }
    }
}

/// The unit of persistence: one row per finalized connection.
///
/// Invariants: `bytes_up, bytes_down >= 0` (enforced by the unsigned type);
/// `status == Error` implies `error_message` is set; a terminal record is written
/// at most once per `request_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub timestamp: i64,
    pub request_id: String,
    #[serde(rename = "type")]
    pub conn_type: ConnectionType,
    pub target_host: String,
    pub target_port: u16,
    pub client_ip: String,
    pub user_agent: Option<String>,
    pub duration: i64,
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub status: ConnectionStatus,
    pub error_message: Option<String>,
}

/// Lives only while a connection is open; removed the instant its terminal record
/// is finalized. Owned exclusively by the `ConnectionTracker`.
#[derive(Debug, Clone)]
pub struct ActiveConnection {
    pub request_id: String,
    pub start_time: i64,
    pub conn_type: ConnectionType,
    pub target_host: String,
    pub target_port: u16,
    pub bytes_up: u64,
    pub bytes_down: u64,
}
