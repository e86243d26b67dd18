//! `UpstreamSelector`: a pure function of `(TargetEndpoint, whitelist snapshot)
//! -> UpstreamDecision`, plus the single side-effecting step that dials the
//! chosen path. The whitelist is read through a copy-on-write `ArcSwap`
//! snapshot (SPEC_FULL.md §4) so a future config reload cannot race in-flight
//! requests.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use proxy_common::{is_private_ip, DialError, TargetEndpoint, UpstreamDecision, WhitelistSet};
use tokio::net::TcpStream;

use crate::dial;

/// Decides direct-vs-SOCKS5 per spec.md §3: `isPrivateIP(host) OR
/// isInWhitelist(host, whitelist)` implies direct.
pub fn decide(target: &TargetEndpoint, whitelist: &WhitelistSet) -> UpstreamDecision {
    if is_private_ip(&target.host) || whitelist.matches(&target.host) {
        UpstreamDecision::Direct
    } else {
        UpstreamDecision::ViaSocks5
    }
}

pub struct UpstreamSelector {
    socks_addr: String,
    dial_timeout: Duration,
    whitelist: Arc<ArcSwap<WhitelistSet>>,
}

impl UpstreamSelector {
    pub fn new(socks_addr: String, dial_timeout: Duration, whitelist: Arc<ArcSwap<WhitelistSet>>) -> Self {
        UpstreamSelector {
            socks_addr,
            dial_timeout,
            whitelist,
        }
    }

    /// Determines the decision and opens the connection in one step; the
    /// decision itself is immutable once taken for this request (SPEC_FULL §4.6).
    pub async fn dial(&self, target: &TargetEndpoint) -> Result<(UpstreamDecision, TcpStream), DialError> {
        let whitelist = self.whitelist.load();
        let decision = decide(target, &whitelist);
        let stream = match decision {
            UpstreamDecision::Direct => dial::dial_direct(&target.host, target.port, self.dial_timeout).await?,
            UpstreamDecision::ViaSocks5 => {
                dial::dial_socks5(&self.socks_addr, &target.host, target.port, self.dial_timeout).await?
            }
        };
        Ok((decision, stream))
    }

    /// Decides the route without dialing anything. Callers whose `Direct` path
    /// dials its own client (the HTTP forwarder's `reqwest`-backed direct path)
    /// use this to avoid opening a raw socket that would be immediately dropped.
    pub fn decide(&self, target: &TargetEndpoint) -> UpstreamDecision {
        let whitelist = self.whitelist.load();
        decide(target, &whitelist)
    }

    /// Opens a SOCKS5-tunneled connection for a target already decided as
    /// `ViaSocks5`.
    pub async fn dial_socks5(&self, target: &TargetEndpoint) -> Result<TcpStream, DialError> {
        dial::dial_socks5(&self.socks_addr, &target.host, target.port, self.dial_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_ip_is_always_direct() {
        let whitelist = WhitelistSet::compile(Vec::<String>::new());
        let target = TargetEndpoint {
            host: "192.168.1.10".to_string(),
            port: 22,
        };
        assert_eq!(decide(&target, &whitelist), UpstreamDecision::Direct);
    }

    #[test]
    fn whitelisted_suffix_is_direct() {
        let whitelist = WhitelistSet::compile(["*.internal.corp"]);
        let target = TargetEndpoint {
            host: "api.internal.corp".to_string(),
            port: 443,
        };
        assert_eq!(decide(&target, &whitelist), UpstreamDecision::Direct);
    }

    #[test]
    fn public_host_with_empty_whitelist_is_via_socks5() {
        let whitelist = WhitelistSet::compile(Vec::<String>::new());
        let target = TargetEndpoint {
            host: "example.com".to_string(),
            port: 80,
        };
        assert_eq!(decide(&target, &whitelist), UpstreamDecision::ViaSocks5);
    }
}
