//! Shared error taxonomy. Each component that can fail owns a `thiserror`-derived
//! enum: `#[error("...: {0}")]` plus `#[from]` wrapping of the underlying cause.

use thiserror::Error;

/// Invalid or missing configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("missing required configuration key: {0}")]
    Missing(String),

    #[error("config file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// SOCKS5 or direct dial failed (network unreachable, DNS failure, SOCKS5
/// `REP != 0x00`).
#[derive(Debug, Error)]
pub enum DialError {
    #[error("dial timed out")]
    Timeout,

    #[error("dial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SOCKS5 upstream rejected the request (REP=0x{0:02x})")]
    SocksReject(u8),

    #[error("SOCKS5 protocol violation: {0}")]
    SocksProtocol(String),
}

/// Failure during the bidirectional relay phase of a tunnel or HTTP body stream.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("idle timeout")]
    Timeout,
}

/// Failure surfaced by `HttpForwarder` / `ConnectHandler` to the client channel.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid client request: {0}")]
    InvalidRequest(String),

    #[error("upstream connect failed: {0}")]
    Dial(#[from] DialError),

    #[error("forwarding I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("relay failed: {0}")]
    Relay(#[from] RelayError),
}

/// Persistence failure. Logged; never surfaced to the data plane (writes are
/// best-effort).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database connection not initialized")]
    NotInitialized,
}
