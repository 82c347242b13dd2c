//! Plain-HTTP handling for the shared listener.
//!
//! The relay listens on a single port. Requests that are not WebSocket
//! upgrades get a landing page, a JSON connection descriptor, or a 404 —
//! the same surface the tunnel presents to probes and dashboards.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::config::ServerContext;

/// Upper bound on the request head; anything larger is rejected.
pub const MAX_REQUEST_HEAD: usize = 8 * 1024;

/// Query parameter value that unlocks the connection descriptor.
const CONFIG_PROBE: &str = "VLESS__CONFIG";

const LANDING_PAGE: &str = "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"UTF-8\">\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\
<title>VLESS Proxy Server</title></head>\
<body><h1>VLESS Proxy Server Running</h1></body></html>";

/// Reads from the stream until a full HTTP request head (terminated by a
/// blank line) has arrived. Returns every byte consumed, including any that
/// follow the head, so the caller can replay them.
pub async fn read_request_head<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Vec<u8>> {
    let mut head = Vec::with_capacity(1024);
    let mut buf = [0u8; 1024];
    loop {
        let n = stream
            .read(&mut buf)
            .await
            .context("Failed to read HTTP request head")?;
        if n == 0 {
            bail!("Connection closed before a full request head arrived");
        }
        head.extend_from_slice(&buf[..n]);
        if find_head_end(&head).is_some() {
            return Ok(head);
        }
        if head.len() > MAX_REQUEST_HEAD {
            bail!("Request head exceeds {MAX_REQUEST_HEAD} bytes");
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// The request line and headers of an incoming HTTP request.
pub struct RequestHead {
    pub method: String,
    pub target: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let head_end = find_head_end(raw).context("Request head is incomplete")?;
        let text =
            std::str::from_utf8(&raw[..head_end]).context("Request head is not valid utf-8")?;

        let mut lines = text.split("\r\n");
        let request_line = lines.next().context("Missing request line")?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next().context("Request line has no method")?.to_string();
        let target = parts.next().context("Request line has no target")?.to_string();

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .with_context(|| format!("Malformed header line: {line}"))?;
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }

        Ok(Self {
            method,
            target,
            headers,
        })
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == &name.to_ascii_lowercase())
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }

    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        let (_, query) = self.target.split_once('?')?;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    /// Host header with any port suffix stripped.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.header("host")
            .map(|h| h.split(':').next().unwrap_or(h))
    }
}

/// Answers a non-upgrade request and closes the stream.
pub async fn respond<S: AsyncWrite + Unpin>(
    stream: &mut S,
    request: &RequestHead,
    ctx: &ServerContext,
) -> Result<()> {
    if request.method != "GET" {
        return write_response(stream, "404 Not Found", "text/plain", "Not Found").await;
    }
    if request.path() == "/" {
        return write_response(stream, "200 OK", "text/html", LANDING_PAGE).await;
    }
    if request.query_param("check") == Some(CONFIG_PROBE) {
        let host = request.host().unwrap_or("localhost");
        let body = config_descriptor(ctx, host);
        return write_response(stream, "200 OK", "application/json", &body).await;
    }
    write_response(stream, "404 Not Found", "text/plain", "Not Found").await
}

pub async fn respond_bad_request<S: AsyncWrite + Unpin>(stream: &mut S) -> Result<()> {
    write_response(stream, "400 Bad Request", "text/plain", "Bad Request").await
}

/// JSON body describing how to connect to this relay.
#[must_use]
pub fn config_descriptor(ctx: &ServerContext, host: &str) -> String {
    let identifier = Uuid::from_bytes(ctx.secret).as_simple().to_string();
    let connection_uri = format!(
        "vless://{identifier}@{host}:443?security=tls&fp=randomized&type=ws&host={host}&encryption=none#{host}"
    );
    serde_json::json!({
        "identifier": identifier,
        "port": ctx.port,
        "host": host,
        "connection_uri": connection_uri,
    })
    .to_string()
}

async fn write_response<S: AsyncWrite + Unpin>(
    stream: &mut S,
    status: &str,
    content_type: &str,
    body: &str,
) -> Result<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream
        .write_all(response.as_bytes())
        .await
        .context("Failed to write HTTP response")?;
    stream
        .shutdown()
        .await
        .context("Failed to close HTTP response stream")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: [u8; 16] = [
        0x36, 0xa5, 0x8f, 0xeb, 0x57, 0xc1, 0x4b, 0xaa, 0xbf, 0x49, 0x02, 0x3e, 0xd2, 0x16, 0xfa,
        0x5b,
    ];

    #[test]
    fn parses_request_line_and_headers() {
        let raw = b"GET /status?check=VLESS__CONFIG HTTP/1.1\r\nHost: relay.test:8443\r\nUpgrade: WebSocket\r\nConnection: Upgrade\r\n\r\n";
        let head = RequestHead::parse(raw).unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.path(), "/status");
        assert_eq!(head.query_param("check"), Some("VLESS__CONFIG"));
        assert_eq!(head.host(), Some("relay.test"));
        assert!(head.is_websocket_upgrade());
    }

    #[test]
    fn plain_get_is_not_an_upgrade() {
        let raw = b"GET / HTTP/1.1\r\nHost: relay.test\r\n\r\n";
        let head = RequestHead::parse(raw).unwrap();
        assert!(!head.is_websocket_upgrade());
        assert_eq!(head.path(), "/");
        assert_eq!(head.query_param("check"), None);
    }

    #[test]
    fn parse_tolerates_bytes_after_the_head() {
        let raw = b"GET / HTTP/1.1\r\nHost: x\r\n\r\nleftover";
        let head = RequestHead::parse(raw).unwrap();
        assert_eq!(head.method, "GET");
    }

    #[test]
    fn rejects_head_without_terminator() {
        assert!(RequestHead::parse(b"GET / HTTP/1.1\r\nHost: x\r\n").is_err());
    }

    #[test]
    fn descriptor_reports_identifier_host_and_port() {
        let ctx = ServerContext {
            secret: SECRET,
            port: 8443,
        };
        let body = config_descriptor(&ctx, "relay.test");
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["identifier"], "36a58feb57c14baabf49023ed216fa5b");
        assert_eq!(value["port"], 8443);
        assert_eq!(value["host"], "relay.test");
        let uri = value["connection_uri"].as_str().unwrap();
        assert!(uri.starts_with("vless://36a58feb57c14baabf49023ed216fa5b@relay.test:443?"));
        assert!(uri.contains("type=ws"));
    }

    #[tokio::test]
    async fn reads_head_across_partial_writes() {
        let (mut near, mut far) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            near.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
            near.write_all(b"Host: x\r\n\r\n").await.unwrap();
        });
        let head = read_request_head(&mut far).await.unwrap();
        assert!(find_head_end(&head).is_some());
        writer.await.unwrap();
    }
}
