//! HTTP/1.x message handling.
//!
//! Head parsing is incremental over the peekable connection so no body
//! bytes are consumed, and bodies are forwarded by framing: explicit
//! length, chunked passthrough, or until close. Hop-by-hop headers are
//! stripped by name plus whatever the `Connection` header lists.

use crate::net::{BufferedStream, TargetAddr};
use anyhow::{bail, Context, Result};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use url::Url;

/// Upper bound for a request or response head
pub const MAX_HEAD_SIZE: usize = 64 * 1024;
const MAX_HEADERS: usize = 100;

/// Headers meaningful only for a single transport hop
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "Connection",
    "Keep-Alive",
    "Proxy-Authenticate",
    "Proxy-Authorization",
    "Proxy-Connection",
    "Te",
    "Trailer",
    "Transfer-Encoding",
    "Upgrade",
];

/// A single header line, order and spelling preserved
#[derive(Debug, Clone)]
pub struct Header {
    /// Field name as received
    pub name: String,
    /// Field value, surrounding whitespace trimmed by the parser
    pub value: String,
}

/// A parsed request head
#[derive(Debug, Clone)]
pub struct Request {
    /// Request method, e.g. `GET` or `CONNECT`
    pub method: String,
    /// Raw request target: absolute URI, authority or origin form
    pub target: String,
    /// Protocol version as (major, minor)
    pub version: (u8, u8),
    /// Header lines in order
    pub headers: Vec<Header>,
    /// The exact head bytes as received, for raw replay
    pub raw_head: Vec<u8>,
}

/// A parsed response head
#[derive(Debug, Clone)]
pub struct Response {
    /// Protocol version as (major, minor)
    pub version: (u8, u8),
    /// Status code
    pub status: u16,
    /// Reason phrase
    pub reason: String,
    /// Header lines in order
    pub headers: Vec<Header>,
}

/// How a message body is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body
    None,
    /// Exactly this many bytes
    ContentLength(u64),
    /// Chunked transfer coding
    Chunked,
    /// Body runs until the peer closes
    UntilClose,
}

impl Request {
    /// First value of a header, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        get_header(&self.headers, name)
    }
}

impl Response {
    /// First value of a header, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        get_header(&self.headers, name)
    }
}

/// First value of `name` in a header list, case-insensitive
pub fn get_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Replace every occurrence of `name` with a single header line
pub fn set_header(headers: &mut Vec<Header>, name: &str, value: &str) {
    headers.retain(|h| !h.name.eq_ignore_ascii_case(name));
    headers.push(Header {
        name: name.to_string(),
        value: value.to_string(),
    });
}

/// Remove every occurrence of `name`
pub fn remove_header(headers: &mut Vec<Header>, name: &str) {
    headers.retain(|h| !h.name.eq_ignore_ascii_case(name));
}

fn connection_tokens(headers: &[Header]) -> Vec<String> {
    headers
        .iter()
        .filter(|h| {
            h.name.eq_ignore_ascii_case("Connection")
                || h.name.eq_ignore_ascii_case("Proxy-Connection")
        })
        .flat_map(|h| h.value.split(','))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Strip hop-by-hop headers: the standard set plus anything listed as a
/// token in the `Connection` header. Idempotent.
pub fn remove_hop_by_hop_headers(headers: &mut Vec<Header>) {
    let extra = connection_tokens(headers);
    headers.retain(|h| {
        !HOP_BY_HOP_HEADERS
            .iter()
            .any(|name| h.name.eq_ignore_ascii_case(name))
            && !extra.iter().any(|t| h.name.eq_ignore_ascii_case(t))
    });
}

/// Whether the request asks for a protocol upgrade
pub fn is_upgrade_request(req: &Request) -> bool {
    req.headers
        .iter()
        .filter(|h| h.name.eq_ignore_ascii_case("Connection"))
        .flat_map(|h| h.value.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case("upgrade"))
}

/// Read one head (request or response) off the connection, up to and
/// including the blank line. `Ok(None)` means the peer closed before
/// sending anything.
async fn read_head<S>(conn: &mut BufferedStream<S>) -> Result<Option<Vec<u8>>>
where
    S: AsyncRead + Unpin,
{
    let mut want = 1;
    loop {
        let buffered_before = conn.buffered();
        let buf = match conn.peek(want).await {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && buffered_before == 0 => {
                return Ok(None)
            }
            Err(e) => return Err(e).context("reading message head"),
        };
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = conn.read_full(pos + 4).await?;
            return Ok(Some(head));
        }
        if buf.len() >= MAX_HEAD_SIZE {
            bail!("message head exceeds {} bytes", MAX_HEAD_SIZE);
        }
        want = buf.len() + 1;
    }
}

/// Parse the next request off the connection. `Ok(None)` on clean EOF.
pub async fn read_request<S>(conn: &mut BufferedStream<S>) -> Result<Option<Request>>
where
    S: AsyncRead + Unpin,
{
    let Some(raw_head) = read_head(conn).await? else {
        return Ok(None);
    };

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);
    let status = parsed
        .parse(&raw_head)
        .map_err(|e| anyhow::anyhow!("malformed request head: {}", e))?;
    if !status.is_complete() {
        bail!("truncated request head");
    }

    Ok(Some(Request {
        method: parsed.method.unwrap_or_default().to_string(),
        target: parsed.path.unwrap_or_default().to_string(),
        version: (1, parsed.version.unwrap_or(1)),
        headers: convert_headers(parsed.headers),
        raw_head,
    }))
}

/// Parse the next response head off the connection
pub async fn read_response_head<S>(conn: &mut BufferedStream<S>) -> Result<Response>
where
    S: AsyncRead + Unpin,
{
    let Some(raw_head) = read_head(conn).await? else {
        bail!("upstream closed before sending a response");
    };

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut headers);
    let status = parsed
        .parse(&raw_head)
        .map_err(|e| anyhow::anyhow!("malformed response head: {}", e))?;
    if !status.is_complete() {
        bail!("truncated response head");
    }

    Ok(Response {
        version: (1, parsed.version.unwrap_or(1)),
        status: parsed.code.unwrap_or(0),
        reason: parsed.reason.unwrap_or_default().to_string(),
        headers: convert_headers(parsed.headers),
    })
}

fn convert_headers(parsed: &[httparse::Header<'_>]) -> Vec<Header> {
    parsed
        .iter()
        .map(|h| Header {
            name: h.name.to_string(),
            value: String::from_utf8_lossy(h.value).trim().to_string(),
        })
        .collect()
}

/// Compute the destination and scheme for a request.
///
/// CONNECT takes its authority from the request target (port defaults to
/// 443). Other methods use the absolute URI when present, falling back
/// to the `Host` header with an empty scheme; ports default to 80 for
/// http and 443 for https.
pub fn http_target(req: &Request) -> Result<(String, TargetAddr)> {
    if req.method.eq_ignore_ascii_case("CONNECT") {
        let dest = split_authority(&req.target, 443)?;
        return Ok(("https".to_string(), dest));
    }

    if !req.target.starts_with('/') {
        if let Ok(parsed) = Url::parse(&req.target) {
            if let Some(host) = parsed.host_str() {
                let default_port = match parsed.scheme() {
                    "https" => 443,
                    _ => 80,
                };
                let port = parsed.port().unwrap_or(default_port);
                let authority = format!("{}:{}", host, port);
                return Ok((parsed.scheme().to_string(), split_authority(&authority, port)?));
            }
        }
    }

    // Origin-form target: destination comes from the Host header and the
    // scheme stays empty, which the forward path answers with 400.
    let host = req
        .header("Host")
        .context("request has neither absolute URI nor Host header")?;
    Ok((String::new(), split_authority(host, 80)?))
}

/// Parse `host`, `host:port` or `[v6]:port` into a destination
pub fn split_authority(authority: &str, default_port: u16) -> Result<TargetAddr> {
    let (host, port) = match authority.rfind(':') {
        // A colon inside a bracketed v6 literal is not a port separator.
        Some(idx) if !authority[idx..].contains(']') => {
            let port = authority[idx + 1..]
                .parse::<u16>()
                .with_context(|| format!("invalid port in authority: {}", authority))?;
            (&authority[..idx], port)
        }
        _ => (authority, default_port),
    };

    let trimmed = host.trim_start_matches('[').trim_end_matches(']');
    if trimmed.is_empty() {
        bail!("empty host in authority: {}", authority);
    }
    let dest = match trimmed.parse::<std::net::IpAddr>() {
        Ok(ip) => TargetAddr::ip(ip, port),
        Err(_) => {
            if trimmed.len() > 255 {
                bail!("hostname too long: {}", trimmed);
            }
            TargetAddr::domain(trimmed, port)
        }
    };
    Ok(dest)
}

/// Drop a redundant default port (`:80` for http, `:443` for https)
/// from the request's `Host` header.
pub fn remove_extra_host_port(req: &mut Request, scheme: &str) {
    let default_suffix = match scheme {
        "http" => ":80",
        "https" => ":443",
        _ => return,
    };
    if let Some(host) = req.header("Host") {
        if let Some(bare) = host.strip_suffix(default_suffix) {
            let bare = bare.to_string();
            set_header(&mut req.headers, "Host", &bare);
        }
    }
}

/// The origin-form request target (`/path?query`) for an upstream hop
pub fn origin_form_target(req: &Request) -> String {
    if req.target.starts_with('/') {
        return req.target.clone();
    }
    match Url::parse(&req.target) {
        Ok(url) => match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        },
        Err(_) => "/".to_string(),
    }
}

/// Framing of a request body
pub fn request_framing(req: &Request) -> BodyFraming {
    if let Some(te) = req.header("Transfer-Encoding") {
        if te.split(',').any(|t| t.trim().eq_ignore_ascii_case("chunked")) {
            return BodyFraming::Chunked;
        }
    }
    match req
        .header("Content-Length")
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        Some(0) | None => BodyFraming::None,
        Some(n) => BodyFraming::ContentLength(n),
    }
}

/// Framing of a response body, given the request method it answers
pub fn response_framing(request_method: &str, resp: &Response) -> BodyFraming {
    if request_method.eq_ignore_ascii_case("HEAD") {
        return BodyFraming::None;
    }
    match resp.status {
        101 => return BodyFraming::UntilClose,
        100..=199 | 204 | 304 => return BodyFraming::None,
        _ => {}
    }
    if let Some(te) = resp.header("Transfer-Encoding") {
        if te.split(',').any(|t| t.trim().eq_ignore_ascii_case("chunked")) {
            return BodyFraming::Chunked;
        }
    }
    match resp
        .header("Content-Length")
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        Some(n) => BodyFraming::ContentLength(n),
        None => BodyFraming::UntilClose,
    }
}

/// Copy a message body from `src` to `dst` according to its framing.
/// Chunked bodies are passed through without re-coding.
pub async fn copy_body<S, W>(
    src: &mut BufferedStream<S>,
    dst: &mut W,
    framing: BodyFraming,
) -> Result<()>
where
    S: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match framing {
        BodyFraming::None => {}
        BodyFraming::ContentLength(len) => {
            let copied = tokio::io::copy(&mut (&mut *src).take(len), dst).await?;
            if copied < len {
                bail!("body truncated: got {} of {} bytes", copied, len);
            }
        }
        BodyFraming::Chunked => copy_chunked(src, dst).await?,
        BodyFraming::UntilClose => {
            tokio::io::copy(src, dst).await?;
        }
    }
    dst.flush().await?;
    Ok(())
}

async fn copy_chunked<S, W>(src: &mut BufferedStream<S>, dst: &mut W) -> Result<()>
where
    S: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let line = read_line(src).await?;
        dst.write_all(&line).await?;

        let size = parse_chunk_size(&line)?;
        if size == 0 {
            // Trailer section runs until an empty line.
            loop {
                let trailer = read_line(src).await?;
                dst.write_all(&trailer).await?;
                if trailer == b"\r\n" {
                    return Ok(());
                }
            }
        }

        let copied = tokio::io::copy(&mut (&mut *src).take(size), dst).await?;
        if copied < size {
            bail!("chunk truncated: got {} of {} bytes", copied, size);
        }

        let terminator = src.read_full(2).await?;
        if terminator != b"\r\n" {
            bail!("malformed chunk terminator");
        }
        dst.write_all(&terminator).await?;
    }
}

async fn read_line<S>(conn: &mut BufferedStream<S>) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut want = 1;
    loop {
        let buf = conn.peek(want).await?;
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            return Ok(conn.read_full(pos + 1).await?);
        }
        if buf.len() >= 8192 {
            bail!("line exceeds 8192 bytes");
        }
        want = buf.len() + 1;
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(line)
        .map_err(|_| anyhow::anyhow!("chunk size line is not ASCII"))?
        .trim_end();
    let size_part = text.split(';').next().unwrap_or("").trim();
    u64::from_str_radix(size_part, 16).with_context(|| format!("bad chunk size: {:?}", text))
}

/// Serialize a request head with the given target in the request line
pub fn request_head_bytes(req: &Request, target: &str) -> Vec<u8> {
    let mut out = format!(
        "{} {} HTTP/{}.{}\r\n",
        req.method, target, req.version.0, req.version.1
    )
    .into_bytes();
    for h in &req.headers {
        out.extend_from_slice(format!("{}: {}\r\n", h.name, h.value).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Serialize a response head
pub fn response_head_bytes(resp: &Response) -> Vec<u8> {
    let mut out = format!(
        "HTTP/{}.{} {} {}\r\n",
        resp.version.0, resp.version.1, resp.status, resp.reason
    )
    .into_bytes();
    for h in &resp.headers {
        out.extend_from_slice(format!("{}: {}\r\n", h.name, h.value).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// A bodyless response in the client's protocol version
pub fn simple_response(version: (u8, u8), status: u16) -> Response {
    Response {
        version,
        status,
        reason: status_text(status).to_string(),
        headers: vec![Header {
            name: "Content-Length".to_string(),
            value: "0".to_string(),
        }],
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        407 => "Proxy Authentication Required",
        502 => "Bad Gateway",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn request_from(bytes: &[u8]) -> Request {
        let mut conn = BufferedStream::new(Cursor::new(bytes.to_vec()));
        read_request(&mut conn).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_read_request_absolute_uri() {
        let req = request_from(
            b"GET http://example.com/index.html HTTP/1.1\r\nHost: example.com\r\n\r\n",
        )
        .await;
        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "http://example.com/index.html");
        assert_eq!(req.version, (1, 1));
        assert_eq!(req.header("Host"), Some("example.com"));
    }

    #[tokio::test]
    async fn test_read_request_leaves_body_in_stream() {
        let wire = b"POST http://e.com/ HTTP/1.1\r\nContent-Length: 4\r\n\r\nbody";
        let mut conn = BufferedStream::new(Cursor::new(wire.to_vec()));
        let req = read_request(&mut conn).await.unwrap().unwrap();
        assert_eq!(request_framing(&req), BodyFraming::ContentLength(4));

        let body = conn.read_full(4).await.unwrap();
        assert_eq!(body, b"body");
    }

    #[tokio::test]
    async fn test_read_request_clean_eof_is_none() {
        let mut conn = BufferedStream::new(Cursor::new(Vec::new()));
        assert!(read_request(&mut conn).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_request_partial_head_is_error() {
        let mut conn = BufferedStream::new(Cursor::new(b"GET / HT".to_vec()));
        assert!(read_request(&mut conn).await.is_err());
    }

    #[tokio::test]
    async fn test_raw_head_preserved_exactly() {
        let wire = b"GET ws://example.com/chat HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n";
        let req = request_from(wire).await;
        assert_eq!(req.raw_head, wire.to_vec());
        assert!(is_upgrade_request(&req));
    }

    #[tokio::test]
    async fn test_read_response_head() {
        let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        let mut conn = BufferedStream::new(Cursor::new(wire.to_vec()));
        let resp = read_response_head(&mut conn).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.reason, "OK");
        assert_eq!(resp.header("Content-Length"), Some("5"));
    }

    #[test]
    fn test_hop_by_hop_stripping() {
        let mut headers = vec![
            Header { name: "Host".into(), value: "example.com".into() },
            Header { name: "connection".into(), value: "keep-alive, X-Custom-Hop".into() },
            Header { name: "Keep-Alive".into(), value: "timeout=5".into() },
            Header { name: "Proxy-Authorization".into(), value: "Basic xyz".into() },
            Header { name: "X-Custom-Hop".into(), value: "1".into() },
            Header { name: "Accept".into(), value: "*/*".into() },
            Header { name: "Transfer-Encoding".into(), value: "chunked".into() },
        ];

        remove_hop_by_hop_headers(&mut headers);
        let names: Vec<&str> = headers.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["Host", "Accept"]);

        // Idempotent: a second pass removes nothing further.
        let before = headers.len();
        remove_hop_by_hop_headers(&mut headers);
        assert_eq!(headers.len(), before);
    }

    #[tokio::test]
    async fn test_http_target_connect() {
        let req = request_from(b"CONNECT example.com:8443 HTTP/1.1\r\nHost: example.com:8443\r\n\r\n").await;
        let (scheme, dest) = http_target(&req).unwrap();
        assert_eq!(scheme, "https");
        assert_eq!(dest.domain_name(), Some("example.com"));
        assert_eq!(dest.port, 8443);
    }

    #[tokio::test]
    async fn test_http_target_absolute_uri_default_ports() {
        let req = request_from(b"GET http://example.com/ HTTP/1.1\r\n\r\n").await;
        let (scheme, dest) = http_target(&req).unwrap();
        assert_eq!(scheme, "http");
        assert_eq!(dest.port, 80);

        let req = request_from(b"GET https://example.com/x HTTP/1.1\r\n\r\n").await;
        let (scheme, dest) = http_target(&req).unwrap();
        assert_eq!(scheme, "https");
        assert_eq!(dest.port, 443);
    }

    #[tokio::test]
    async fn test_http_target_origin_form_uses_host_header() {
        let req = request_from(b"GET /path HTTP/1.1\r\nHost: internal:8080\r\n\r\n").await;
        let (scheme, dest) = http_target(&req).unwrap();
        assert_eq!(scheme, "");
        assert_eq!(dest.domain_name(), Some("internal"));
        assert_eq!(dest.port, 8080);
    }

    #[tokio::test]
    async fn test_http_target_ip_literal() {
        let req = request_from(b"GET http://127.0.0.1:8080/ HTTP/1.1\r\n\r\n").await;
        let (_, dest) = http_target(&req).unwrap();
        assert!(dest.domain_name().is_none());
        assert_eq!(dest.dial_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_split_authority_v6() {
        let dest = split_authority("[::1]:8443", 443).unwrap();
        assert_eq!(dest.dial_addr(), "[::1]:8443");

        let dest = split_authority("[::1]", 443).unwrap();
        assert_eq!(dest.port, 443);
    }

    #[test]
    fn test_split_authority_rejects_empty_host() {
        assert!(split_authority(":80", 80).is_err());
        assert!(split_authority("", 80).is_err());
    }

    #[tokio::test]
    async fn test_remove_extra_host_port() {
        let mut req =
            request_from(b"GET http://example.com:80/ HTTP/1.1\r\nHost: example.com:80\r\n\r\n")
                .await;
        remove_extra_host_port(&mut req, "http");
        assert_eq!(req.header("Host"), Some("example.com"));

        // A non-default port is preserved.
        let mut req =
            request_from(b"GET http://example.com:8080/ HTTP/1.1\r\nHost: example.com:8080\r\n\r\n")
                .await;
        remove_extra_host_port(&mut req, "http");
        assert_eq!(req.header("Host"), Some("example.com:8080"));
    }

    #[tokio::test]
    async fn test_origin_form_target() {
        let req = request_from(b"GET http://e.com/a/b?x=1 HTTP/1.1\r\n\r\n").await;
        assert_eq!(origin_form_target(&req), "/a/b?x=1");

        let req = request_from(b"GET http://e.com HTTP/1.1\r\n\r\n").await;
        assert_eq!(origin_form_target(&req), "/");

        let req = request_from(b"GET /already HTTP/1.1\r\nHost: e.com\r\n\r\n").await;
        assert_eq!(origin_form_target(&req), "/already");
    }

    #[tokio::test]
    async fn test_response_framing_rules() {
        let resp = Response {
            version: (1, 1),
            status: 200,
            reason: "OK".into(),
            headers: vec![Header { name: "Content-Length".into(), value: "10".into() }],
        };
        assert_eq!(response_framing("GET", &resp), BodyFraming::ContentLength(10));
        assert_eq!(response_framing("HEAD", &resp), BodyFraming::None);

        let mut chunked = resp.clone();
        set_header(&mut chunked.headers, "Transfer-Encoding", "chunked");
        remove_header(&mut chunked.headers, "Content-Length");
        assert_eq!(response_framing("GET", &chunked), BodyFraming::Chunked);

        let no_length = Response {
            version: (1, 0),
            status: 200,
            reason: "OK".into(),
            headers: vec![],
        };
        assert_eq!(response_framing("GET", &no_length), BodyFraming::UntilClose);

        let no_content = Response {
            version: (1, 1),
            status: 204,
            reason: "No Content".into(),
            headers: vec![],
        };
        assert_eq!(response_framing("GET", &no_content), BodyFraming::None);
    }

    #[tokio::test]
    async fn test_copy_body_content_length() {
        let mut src = BufferedStream::new(Cursor::new(b"0123456789extra".to_vec()));
        let mut dst = Vec::new();
        copy_body(&mut src, &mut dst, BodyFraming::ContentLength(10))
            .await
            .unwrap();
        assert_eq!(dst, b"0123456789");
        // The trailing bytes are untouched.
        assert_eq!(src.read_full(5).await.unwrap(), b"extra");
    }

    #[tokio::test]
    async fn test_copy_body_chunked_passthrough() {
        let wire = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\nNEXT";
        let mut src = BufferedStream::new(Cursor::new(wire.to_vec()));
        let mut dst = Vec::new();
        copy_body(&mut src, &mut dst, BodyFraming::Chunked)
            .await
            .unwrap();
        assert_eq!(dst, b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n");
        assert_eq!(src.read_full(4).await.unwrap(), b"NEXT");
    }

    #[tokio::test]
    async fn test_copy_body_chunked_with_extension_and_trailer() {
        let wire = b"3;ext=1\r\nabc\r\n0\r\nX-Sum: 9\r\n\r\n";
        let mut src = BufferedStream::new(Cursor::new(wire.to_vec()));
        let mut dst = Vec::new();
        copy_body(&mut src, &mut dst, BodyFraming::Chunked)
            .await
            .unwrap();
        assert_eq!(dst, wire.to_vec());
    }

    #[tokio::test]
    async fn test_copy_body_truncated_is_error() {
        let mut src = BufferedStream::new(Cursor::new(b"abc".to_vec()));
        let mut dst = Vec::new();
        let err = copy_body(&mut src, &mut dst, BodyFraming::ContentLength(10)).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_request_head_round_trip() {
        let req = request_from(b"GET http://e.com/p HTTP/1.1\r\nHost: e.com\r\nAccept: */*\r\n\r\n").await;
        let head = request_head_bytes(&req, "/p");
        assert!(head.starts_with(b"GET /p HTTP/1.1\r\n"));
        assert!(head.ends_with(b"\r\n\r\n"));

        let text = String::from_utf8(head).unwrap();
        assert!(text.contains("Host: e.com\r\n"));
        assert!(text.contains("Accept: */*\r\n"));
    }

    #[test]
    fn test_response_head_bytes() {
        let resp = simple_response((1, 1), 502);
        let head = String::from_utf8(response_head_bytes(&resp)).unwrap();
        assert!(head.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        assert!(head.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn test_simple_response_preserves_version() {
        let resp = simple_response((1, 0), 400);
        assert_eq!(resp.version, (1, 0));
        let head = String::from_utf8(response_head_bytes(&resp)).unwrap();
        assert!(head.starts_with("HTTP/1.0 400 Bad Request\r\n"));
    }
}
