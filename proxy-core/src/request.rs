//! Reads a single HTTP request line and header block off a raw `TcpStream`,
//! without pulling in a full HTTP parser. Grounded in the corpus's demonstrated
//! willingness to hand-roll this ("pretty sketchy, but it's what hyper itself
//! does internally" -- `connect_tunnel::handshake` in the agentgateway
//! reference repo): both `HttpForwarder` and `ConnectHandler` need only the
//! request line, the header map, and a byte count of what was read (for
//! accurate `bytes_up` accounting), not a general-purpose parser.

use std::collections::HashMap;

use proxy_common::ForwardError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const MAX_HEAD_SIZE: usize = 64 * 1024;

/// The parsed request line plus headers, and the exact byte count consumed
/// reading them (the data plane's `bytesUp` must include this head, not just
/// any body bytes relayed afterward).
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub raw_len: u64,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        let lower = name.to_ascii_lowercase();
        self.headers.get(&lower).map(|v| v.as_str())
    }
}

/// Reads byte-by-byte until the blank line terminating the header block,
/// bounded by `MAX_HEAD_SIZE` to protect against a client that never sends one.
pub async fn read_head(stream: &mut TcpStream) -> Result<RequestHead, ForwardError> {
    let mut buf = Vec::with_capacity(1024);
    let mut one = [0u8; 1];

    loop {
        if buf.len() >= MAX_HEAD_SIZE {
            return Err(ForwardError::InvalidRequest(
                "request head exceeds maximum size".to_string(),
            ));
        }
        let n = stream
            .read(&mut one)
            .await
            .map_err(ForwardError::Io)?;
        if n == 0 {
            return Err(ForwardError::InvalidRequest(
                "connection closed before request head completed".to_string(),
            ));
        }
        buf.push(one[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }

    parse_head(&buf)
}

fn parse_head(buf: &[u8]) -> Result<RequestHead, ForwardError> {
    let text = std::str::from_utf8(buf)
        .map_err(|_| ForwardError::InvalidRequest("request head is not valid UTF-8".to_string()))?;

    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| ForwardError::InvalidRequest("missing request line".to_string()))?;

    let mut parts = request_line.split(' ');
    let method = parts
        .next()
        .ok_or_else(|| ForwardError::InvalidRequest("missing method".to_string()))?
        .to_string();
    let target = parts
        .next()
        .ok_or_else(|| ForwardError::InvalidRequest("missing request target".to_string()))?
        .to_string();
    let version = parts
        .next()
        .ok_or_else(|| ForwardError::InvalidRequest("missing HTTP version".to_string()))?
        .to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| {
            ForwardError::InvalidRequest(format!("malformed header line '{}'", line))
        })?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    Ok(RequestHead {
        method,
        target,
        version,
        headers,
        raw_len: buf.len() as u64,
    })
}

/// Writes a minimal status-line-only response with no body, used for the
/// CONNECT handshake's `200 Connection Established` and its error paths.
pub async fn write_status_line(stream: &mut TcpStream, line: &str) -> std::io::Result<()> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n\r\n").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_connect_request_line_and_headers() {
        let raw = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\nUser-Agent: test\r\n\r\n";
        let head = parse_head(raw).unwrap();
        assert_eq!(head.method, "CONNECT");
        assert_eq!(head.target, "example.com:443");
        assert_eq!(head.version, "HTTP/1.1");
        assert_eq!(head.header("host"), Some("example.com:443"));
        assert_eq!(head.header("User-Agent"), Some("test"));
        assert_eq!(head.raw_len, raw.len() as u64);
    }

    #[test]
    fn parses_an_absolute_uri_get_request() {
        let raw = b"GET http://example.com/path HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let head = parse_head(raw).unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.target, "http://example.com/path");
    }

    #[test]
    fn rejects_a_missing_request_line() {
        assert!(parse_head(b"\r\n\r\n").is_err());
    }

    #[test]
    fn rejects_a_malformed_header() {
        let raw = b"GET / HTTP/1.1\r\nnotaheader\r\n\r\n";
        assert!(parse_head(raw).is_err());
    }
}
