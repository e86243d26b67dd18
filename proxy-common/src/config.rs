//! The `Config` struct, its YAML loader, and the mini-config mirror used for
//! per-request reads of the whitelist.
//!
//! Schema design, layered overrides and hot-reload watchers are out of scope (see
//! spec.md §1); this module only turns bytes on disk into a validated `Config`
//! value, with environment-variable overrides for the two address fields
//! following flag > env > file > default precedence.

use std::fs;
use std::path::Path;

use mini_config::Configure;
use serde::{Deserialize, Serialize};

use crate::address::{parse_address, WhitelistSet};
use crate::error::ConfigError;

/// Mini-config keys mirroring the parts of `Config` that request-path code must
/// consult per request.
#[derive(Debug, Clone, Configure)]
pub enum ProxyData {
    Whitelist,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Proxy listen address, e.g. "0.0.0.0:8080". Required.
    pub addr: String,
    /// Upstream SOCKS5 address, e.g. "127.0.0.1:1080". Required.
    pub socks_addr: String,
    /// Control-plane API/static server address.
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    /// Direct-connection domains; accepts `*.suffix` entries.
    #[serde(default)]
    pub whitelist: Vec<String>,
    /// Directory for rotated log files; absent disables file logging.
    #[serde(default)]
    pub log_path: Option<String>,
    /// Path to the SQLite file backing the stats store.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    /// Static asset root for the API server.
    #[serde(default)]
    pub static_dir: Option<String>,
    /// Master toggle for persistence.
    #[serde(default = "default_enable_database", rename = "enableDatabase")]
    pub enable_database: bool,
    /// Dial timeout for SOCKS5 handshakes and direct dials.
    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,
    /// Idle timeout for HTTP upstream bodies.
    #[serde(default = "default_http_idle_timeout_secs")]
    pub http_idle_timeout_secs: u64,
    /// Idle timeout for CONNECT tunnels.
    #[serde(default = "default_connect_idle_timeout_secs")]
    pub connect_idle_timeout_secs: u64,
}

fn default_http_addr() -> String {
    "0.0.0.0:24042".to_string()
}

fn default_sqlite_path() -> String {
    "./data/proxy.db".to_string()
}

fn default_enable_database() -> bool {
    true
}

fn default_dial_timeout_secs() -> u64 {
    10
}

fn default_http_idle_timeout_secs() -> u64 {
    30
}

fn default_connect_idle_timeout_secs() -> u64 {
    60
}

impl Config {
    /// Loads and validates configuration from a YAML file at `path`, applying
    /// `PROXY_ADDR` / `PROXY_SOCKS_ADDR` environment overrides afterward.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&raw)?;

        if let Ok(addr) = std::env::var("PROXY_ADDR") {
            config.addr = addr;
        }
        if let Ok(socks_addr) = std::env::var("PROXY_SOCKS_ADDR") {
            config.socks_addr = socks_addr;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.addr.trim().is_empty() {
            return Err(ConfigError::Missing("addr".to_string()));
        }
        if self.socks_addr.trim().is_empty() {
            return Err(ConfigError::Missing("socks_addr".to_string()));
        }
        parse_address(&self.socks_addr)?;
        Ok(())
    }

    /// Compiles the configured whitelist into a lookup-friendly `WhitelistSet` and
    /// mirrors the raw entries into the mini-config store so other code (e.g. the
    /// admin-edit validation path in `proxy-api`) can read the same values through
    /// the key/value store.
    pub fn compiled_whitelist(&self) -> WhitelistSet {
        ProxyData::Whitelist.xset::<Vec<String>>(self.whitelist.clone());
        WhitelistSet::compile(&self.whitelist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let file = tempfile_yaml(
            r#"
addr: "0.0.0.0:8080"
socks_addr: "127.0.0.1:1080"
"#,
        );
        let config = Config::load(file.path()).expect("config should load");
        assert_eq!(config.addr, "0.0.0.0:8080");
        assert_eq!(config.http_addr, default_http_addr());
        assert!(config.enable_database);
        file.close();
    }

    #[test]
    fn rejects_missing_required_fields() {
        let file = tempfile_yaml(r#"addr: "0.0.0.0:8080""#);
        let err = Config::load(file.path());
        assert!(err.is_err());
        file.close();
    }

    struct TempYaml {
        path: std::path::PathBuf,
    }

    impl TempYaml {
        fn path(&self) -> &Path {
            &self.path
        }

        fn close(self) {
            let _ = fs::remove_file(&self.path);
        }
    }

    fn tempfile_yaml(contents: &str) -> TempYaml {
        // Tests in this module run as separate threads of the same process, so
        // `process::id()` alone isn't unique enough to avoid two tests sharing
        // a path; fold in the thread id too.
        let path = std::env::temp_dir().join(format!(
            "proxy-common-config-test-{}-{:?}.yaml",
            std::process::id(),
            std::thread::current().id()
        ));
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        TempYaml { path }
    }
}
