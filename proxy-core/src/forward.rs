//! `HttpForwarder`: handles requests whose method is not CONNECT and whose
//! target is an absolute URI (spec.md §4.8). Only `Content-Length`-framed
//! request bodies are read; chunked request encoding on the *client* side is
//! not decoded here -- the direct path delegates framing to `reqwest`
//! entirely, and only the SOCKS5 path needs a hand-rolled writer since its
//! response is piped through verbatim (spec.md §9) -- recorded as a scope
//! note in DESIGN.md.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use proxy_common::{ConnectionStatus, ConnectionType, RequestIdGen, TargetEndpoint, UpstreamDecision};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

use crate::request::{write_status_line, RequestHead};
use crate::selector::UpstreamSelector;
use crate::tracker::ConnectionTracker;

/// Headers that are meaningful only for a single transport hop and must never
/// be forwarded (glossary: "Hop-by-hop header").
fn hop_by_hop(headers: &std::collections::HashMap<String, String>) -> HashSet<String> {
    let mut set: HashSet<String> = ["proxy-connection", "proxy-authorization", "connection"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if let Some(conn) = headers.get("connection") {
        for token in conn.split(',') {
            set.insert(token.trim().to_ascii_lowercase());
        }
    }
    set
}

/// Builds the `reqwest::Client` used for the direct-HTTP path. Redirects are
/// disabled: a forward proxy must hand 3xx responses back to the client
/// verbatim rather than follow them on the client's behalf (spec.md §8).
pub fn direct_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("failed to build direct-HTTP client")
}

pub struct HttpForwarder {
    pub selector: Arc<UpstreamSelector>,
    pub tracker: Arc<ConnectionTracker>,
    pub request_ids: Arc<RequestIdGen>,
    pub http_idle_timeout: Duration,
    pub direct_client: reqwest::Client,
}

impl HttpForwarder {
    pub async fn handle(&self, mut client: TcpStream, head: RequestHead, client_ip: String) {
        let url = match Url::parse(&head.target) {
            Ok(u) if u.host_str().is_some() => u,
            _ => {
                let _ = write_status_line(&mut client, "HTTP/1.1 400 Bad Request").await;
                return;
            }
        };

        let host = url.host_str().unwrap().to_string();
        let port = url
            .port_or_known_default()
            .unwrap_or(if url.scheme() == "https" { 443 } else { 80 });

        let request_id = self.request_ids.next();
        let user_agent = head.header("user-agent").map(|s| s.to_string());
        self.tracker.start_connection(
            request_id.clone(),
            ConnectionType::Http,
            host.clone(),
            port,
            client_ip,
            user_agent,
        );

        let target = TargetEndpoint { host, port };
        let body = match read_body(&mut client, &head).await {
            Ok(b) => b,
            Err(e) => {
                let _ = write_status_line(&mut client, "HTTP/1.1 400 Bad Request").await;
                self.tracker
                    .end_connection(&request_id, ConnectionStatus::Error, Some(e.to_string()));
                return;
            }
        };

        // The `Direct` path dials via `reqwest` itself (`forward_direct`), so only
        // decide the route here; a raw socket is opened only for `ViaSocks5`,
        // which still needs one to speak the SOCKS5 handshake.
        let decision = self.selector.decide(&target);
        let outcome = match decision {
            UpstreamDecision::ViaSocks5 => {
                let upstream = match self.selector.dial_socks5(&target).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = write_status_line(&mut client, "HTTP/1.1 502 Bad Gateway").await;
                        self.tracker
                            .end_connection(&request_id, ConnectionStatus::Error, Some(e.to_string()));
                        return;
                    }
                };
                self.forward_via_socks5(&mut client, upstream, &head, &url, &body).await
            }
            UpstreamDecision::Direct => self.forward_direct(&mut client, &head, &url, &body).await,
        };

        self.tracker.add_bytes_up(&request_id, outcome.bytes_up);
        self.tracker.add_bytes_down(&request_id, outcome.bytes_down);
        self.tracker
            .end_connection(&request_id, outcome.status, outcome.error_message);
    }

    async fn forward_via_socks5(
        &self,
        client: &mut TcpStream,
        mut upstream: TcpStream,
        head: &RequestHead,
        url: &Url,
        body: &[u8],
    ) -> ForwardOutcome {
        let origin_form = if let Some(q) = url.query() {
            format!("{}?{}", url.path(), q)
        } else {
            url.path().to_string()
        };

        let skip = hop_by_hop(&head.headers);
        let mut request = format!("{} {} HTTP/1.1\r\n", head.method, origin_form);
        for (name, value) in &head.headers {
            if skip.contains(name.as_str()) {
                continue;
            }
            request.push_str(&format!("{}: {}\r\n", name, value));
        }
        request.push_str("Connection: close\r\n\r\n");

        let mut bytes_up = request.len() as u64;
        if upstream.write_all(request.as_bytes()).await.is_err() {
            return ForwardOutcome::error(0, 0, "upstream write failed".to_string());
        }
        if !body.is_empty() {
            if upstream.write_all(body).await.is_err() {
                return ForwardOutcome::error(bytes_up, 0, "upstream write failed".to_string());
            }
            bytes_up += body.len() as u64;
        }

        stream_response(client, &mut upstream, self.http_idle_timeout, bytes_up).await
    }

    async fn forward_direct(
        &self,
        client: &mut TcpStream,
        head: &RequestHead,
        url: &Url,
        body: &[u8],
    ) -> ForwardOutcome {
        let method = match reqwest::Method::from_bytes(head.method.as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                let _ = write_status_line(client, "HTTP/1.1 400 Bad Request").await;
                return ForwardOutcome::error(0, 0, "invalid HTTP method".to_string());
            }
        };

        let skip = hop_by_hop(&head.headers);
        let mut builder = self.direct_client.request(method, url.clone());
        for (name, value) in &head.headers {
            if skip.contains(name.as_str()) || name == "host" {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !body.is_empty() {
            builder = builder.body(body.to_vec());
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                let _ = write_status_line(client, "HTTP/1.1 502 Bad Gateway").await;
                return ForwardOutcome::error(body.len() as u64, 0, e.to_string());
            }
        };

        let status = response.status();
        let mut header_lines = String::new();
        for (name, value) in response.headers() {
            let lower = name.as_str();
            // `reqwest` already de-frames the body for us (chunked decoding,
            // length enforcement), so neither framing header describes what
            // we're about to write; re-emitting either would make the
            // response malformed to the client.
            if lower.eq_ignore_ascii_case("connection")
                || lower.eq_ignore_ascii_case("transfer-encoding")
                || lower.eq_ignore_ascii_case("content-length")
            {
                continue;
            }
            if let Ok(v) = value.to_str() {
                header_lines.push_str(&format!("{}: {}\r\n", name.as_str(), v));
            }
        }
        let status_line = format!(
            "HTTP/1.1 {} {}\r\n{}\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            header_lines
        );

        if client.write_all(status_line.as_bytes()).await.is_err() {
            return ForwardOutcome::error(body.len() as u64, 0, "client aborted".to_string());
        }

        let mut bytes_down = status_line.len() as u64;
        let mut response = response;
        loop {
            match tokio::time::timeout(self.http_idle_timeout, response.chunk()).await {
                Ok(Ok(Some(chunk))) => {
                    if client.write_all(&chunk).await.is_err() {
                        return ForwardOutcome::error(body.len() as u64, bytes_down, "client aborted".to_string());
                    }
                    bytes_down += chunk.len() as u64;
                }
                Ok(Ok(None)) => {
                    return ForwardOutcome {
                        bytes_up: body.len() as u64,
                        bytes_down,
                        status: ConnectionStatus::Success,
                        error_message: None,
                    };
                }
                Ok(Err(e)) => {
                    return ForwardOutcome::error(body.len() as u64, bytes_down, e.to_string());
                }
                Err(_) => {
                    return ForwardOutcome {
                        bytes_up: body.len() as u64,
                        bytes_down,
                        status: ConnectionStatus::Timeout,
                        error_message: None,
                    };
                }
            }
        }
    }
}

struct ForwardOutcome {
    bytes_up: u64,
    bytes_down: u64,
    status: ConnectionStatus,
    error_message: Option<String>,
}

impl ForwardOutcome {
    fn error(bytes_up: u64, bytes_down: u64, message: String) -> Self {
        ForwardOutcome {
            bytes_up,
            bytes_down,
            status: ConnectionStatus::Error,
            error_message: Some(message),
        }
    }
}

/// Reads exactly `Content-Length` bytes of request body from `client`, if present.
async fn read_body(client: &mut TcpStream, head: &RequestHead) -> std::io::Result<Vec<u8>> {
    let len: usize = match head.header("content-length") {
        Some(v) => v.trim().parse().unwrap_or(0),
        None => 0,
    };
    if len == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; len];
    client.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Streams the upstream HTTP/1.1 response verbatim to the client, byte for
/// byte, applying an idle timeout to each read (spec.md §4.8 step 3/4).
async fn stream_response(
    client: &mut TcpStream,
    upstream: &mut TcpStream,
    idle: Duration,
    bytes_up: u64,
) -> ForwardOutcome {
    let mut buf = vec![0u8; 16 * 1024];
    let mut bytes_down = 0u64;
    loop {
        match tokio::time::timeout(idle, upstream.read(&mut buf)).await {
            Ok(Ok(0)) => {
                return ForwardOutcome {
                    bytes_up,
                    bytes_down,
                    status: ConnectionStatus::Success,
                    error_message: None,
                };
            }
            Ok(Ok(n)) => {
                if client.write_all(&buf[..n]).await.is_err() {
                    return ForwardOutcome::error(bytes_up, bytes_down, "client aborted".to_string());
                }
                bytes_down += n as u64;
            }
            Ok(Err(e)) => {
                return ForwardOutcome::error(bytes_up, bytes_down, e.to_string());
            }
            Err(_) => {
                return ForwardOutcome {
                    bytes_up,
                    bytes_down,
                    status: ConnectionStatus::Timeout,
                    error_message: None,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn hop_by_hop_includes_connection_listed_headers() {
        let mut headers = HashMap::new();
        headers.insert("connection".to_string(), "x-custom".to_string());
        let skip = hop_by_hop(&headers);
        assert!(skip.contains("connection"));
        assert!(skip.contains("proxy-connection"));
        assert!(skip.contains("proxy-authorization"));
        assert!(skip.contains("x-custom"));
    }

    #[tokio::test]
    async fn read_body_respects_content_length() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let mut writer = TcpStream::connect(addr).await.unwrap();
        let mut reader = accept.await.unwrap();

        writer.write_all(b"hello world").await.unwrap();

        let mut headers = HashMap::new();
        headers.insert("content-length".to_string(), "5".to_string());
        let head = RequestHead {
            method: "POST".to_string(),
            target: "http://example.com/".to_string(),
            version: "HTTP/1.1".to_string(),
            headers,
            raw_len: 0,
        };

        let body = read_body(&mut reader, &head).await.unwrap();
        assert_eq!(body, b"hello");
    }
}
