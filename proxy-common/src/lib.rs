//! # Proxy Common
//!
//! Shared data model, configuration, error taxonomy and storage layer used by
//! both the `proxy-core` data plane and the `proxy-api` control plane.
//!
//! ## Module Structure
//!
//! * `address`: host:port parsing and the private-IP / whitelist classification rules.
//! * `request_id`: process-unique request identifier generation.
//! * `model`: the value types that flow between the proxy and the stats store.
//! * `error`: the `thiserror`-derived error taxonomy shared across both binaries.
//! * `config`: the `Config` struct, its loader, and the copy-on-write whitelist snapshot.
//! * `store`: the `rusqlite`-backed `Database`/`StatsCollector` abstraction.

pub mod address;
pub mod config;
pub mod error;
pub mod model;
pub mod request_id;
pub mod store;

pub use address::{is_in_whitelist, is_private_ip, parse_address, ParsedAddress, WhitelistSet};
pub use config::Config;
pub use error::{ConfigError, DialError, ForwardError, RelayError, StoreError};
pub use model::{
    ActiveConnection, ConnectionRecord, ConnectionStatus, ConnectionType, TargetEndpoint,
    UpstreamDecision,
};
pub use request_id::RequestIdGen;
pub use store::{
    ActivePage, Database, Pagination, PaginationResult, StatsCollector, StatsFilter, StatsPage,
    StatsTotals, TopHost,
};
