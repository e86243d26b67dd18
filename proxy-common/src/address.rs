//! Host:port parsing and the direct-connection classification rules.
//!
//! `AddressParser` and `ClassifierUtils` from the component table are both pure,
//! synchronous, allocation-light functions here so they can be shared by the data
//! plane and (for whitelist validation on the admin-edit path) the control plane.

use std::collections::HashSet;
use std::net::IpAddr;

use crate::error::ConfigError;

/// A parsed `host:port` pair. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    pub host: String,
    pub port: u16,
}

/// Splits on the last `:` so IPv6 literals (which contain `:`) parse correctly.
pub fn parse_address(input: &str) -> Result<ParsedAddress, ConfigError> {
    let idx = input.rfind(':').ok_or_else(|| {
        ConfigError::InvalidAddress(format!("missing port separator in '{}'", input))
    })?;

    let (host, port_str) = (&input[..idx], &input[idx + 1..]);

    if host.is_empty() {
        return Err(ConfigError::InvalidAddress(format!(
            "empty host in '{}'",
            input
        )));
    }

    let port: u16 = port_str
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(format!("invalid port in '{}'", input)))?;

    if port == 0 {
        return Err(ConfigError::InvalidAddress(format!(
            "port out of range in '{}'",
            input
        )));
    }

    Ok(ParsedAddress {
        host: host.to_string(),
        port,
    })
}

/// Returns true iff `host` is a literal IP address in a private/link-local/loopback
/// range. Hostnames that are not valid IP literals are never pre-resolved here and
/// classify as `false`.
pub fn is_private_ip(host: &str) -> bool {
    let ip: IpAddr = match host.parse() {
        Ok(ip) => ip,
        Err(_) => return false,
    };

    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            octets[0] == 10
                || (octets[0] == 172 && (16..=31).contains(&octets[1]))
                || (octets[0] == 192 && octets[1] == 168)
                || octets[0] == 127
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() {
                return true;
            }
            let segments = v6.segments();
            // fe80::/10
            if (segments[0] & 0xffc0) == 0xfe80 {
                return true;
            }
            // fc00::/7 (unique local)
            (segments[0] & 0xfe00) == 0xfc00
        }
    }
}

/// A compiled whitelist: exact hostnames and `*.suffix` patterns, lowercased once
/// at construction so matching a request never re-scans the raw entry list.
#[derive(Debug, Clone, Default)]
pub struct WhitelistSet {
    exact: HashSet<String>,
    suffixes: HashSet<String>,
}

impl WhitelistSet {
    pub fn compile<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut exact = HashSet::new();
        let mut suffixes = HashSet::new();

        for entry in entries {
            let lower = entry.as_ref().to_ascii_lowercase();
            if let Some(suffix) = lower.strip_prefix("*.") {
                suffixes.insert(suffix.to_string());
            } else {
                exact.insert(lower);
            }
        }

        WhitelistSet { exact, suffixes }
    }

    pub fn matches(&self, host: &str) -> bool {
        let lower = host.to_ascii_lowercase();
        if self.exact.contains(&lower) {
            return true;
        }
        for suffix in &self.suffixes {
            if &lower == suffix || lower.ends_with(&format!(".{}", suffix)) {
                return true;
            }
        }
        false
    }
}

/// Case-insensitive match against a raw (uncompiled) whitelist entry list. Kept for
/// one-off checks (e.g. validating a single domain on the admin-edit path) where
/// compiling a `WhitelistSet` would be wasted work.
pub fn is_in_whitelist(host: &str, whitelist: &[String]) -> bool {
    WhitelistSet::compile(whitelist).matches(host)
}
