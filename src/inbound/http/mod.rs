//! HTTP proxy inbound handler.
//!
//! Serves a connection as a sequence of proxied requests: CONNECT opens
//! a raw tunnel, Upgrade requests are replayed verbatim and relayed, and
//! everything else is forwarded through the session's upstream client
//! with hop-by-hop headers stripped in both directions. The keep-alive
//! loop is governed by the client's `Proxy-Connection` header.

mod auth;
mod client;
pub mod message;

pub use auth::{authenticate, AuthCache, ProxyAuthenticator};
pub use client::{Exchange, UpstreamClient};

use crate::inbound::Metadata;
use crate::net::{relay, BufferedStream, StreamDyn};
use crate::route::Router;
use anyhow::{Context, Result};
use message::{
    copy_body, http_target, is_upgrade_request, origin_form_target, remove_extra_host_port,
    remove_hop_by_hop_headers, request_framing, response_head_bytes, set_header, simple_response,
    BodyFraming, Request, Response,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const AUTH_CACHE_CAPACITY: usize = 64;

/// What a single proxied request produced
enum Outcome {
    /// A locally generated response head (errors, auth challenges)
    Respond(Response),
    /// An upstream exchange whose body still needs streaming
    Forward(Box<Exchange>),
}

/// HTTP protocol handler
#[derive(Debug, Default)]
pub struct HttpInbound {
    authenticator: Option<Arc<dyn ProxyAuthenticator>>,
}

impl HttpInbound {
    /// Build the handler; no authenticator is registered by default and
    /// every request is trusted.
    pub fn new() -> Self {
        HttpInbound {
            authenticator: None,
        }
    }

    /// Build a handler that requires proxy authentication
    pub fn with_authenticator(authenticator: Arc<dyn ProxyAuthenticator>) -> Self {
        HttpInbound {
            authenticator: Some(authenticator),
        }
    }

    /// Serve one connection to completion
    pub async fn handle<S>(
        &self,
        mut conn: BufferedStream<S>,
        router: &Router,
        peer: Option<SocketAddr>,
    ) -> Result<()>
    where
        S: StreamDyn,
    {
        let mut client: Option<UpstreamClient> = None;
        let mut auth_cache = AuthCache::new(AUTH_CACHE_CAPACITY);
        let mut trusted = self.authenticator.is_none();

        loop {
            let Some(req) = message::read_request(&mut conn)
                .await
                .context("reading request")?
            else {
                return Ok(());
            };

            let keep_alive = req
                .header("Proxy-Connection")
                .map(|v| v.trim().eq_ignore_ascii_case("keep-alive"))
                .unwrap_or(false);

            debug!("{} {} (keep-alive: {})", req.method, req.target, keep_alive);

            let mut early = None;
            if !trusted {
                let authenticator = self.authenticator.as_deref().expect("checked above");
                match authenticate(authenticator, &mut auth_cache, &req) {
                    Some(resp) => early = Some(resp),
                    None => trusted = true,
                }
            }

            let outcome = match early {
                Some(resp) => Outcome::Respond(resp),
                None => {
                    // CONNECT and Upgrade consume the connection; they
                    // return from inside.
                    match self
                        .proxy_request(&req, &mut conn, &mut client, router, peer)
                        .await?
                    {
                        Some(outcome) => outcome,
                        None => return Ok(()),
                    }
                }
            };

            match outcome {
                Outcome::Respond(mut resp) => {
                    finalize_headers(&mut resp.headers, keep_alive);
                    conn.write_all(&response_head_bytes(&resp)).await?;
                    conn.flush().await?;
                    if !keep_alive {
                        return Ok(());
                    }
                }
                Outcome::Forward(mut exchange) => {
                    remove_hop_by_hop_headers(&mut exchange.response.headers);

                    // A body delimited by connection close forces this
                    // connection to close too, whatever the client asked.
                    let close_delimited = exchange.framing == BodyFraming::UntilClose;
                    let keep = keep_alive && !close_delimited;

                    if exchange.framing == BodyFraming::Chunked {
                        set_header(
                            &mut exchange.response.headers,
                            "Transfer-Encoding",
                            "chunked",
                        );
                    }
                    finalize_headers(&mut exchange.response.headers, keep);

                    conn.write_all(&response_head_bytes(&exchange.response))
                        .await?;
                    copy_body(&mut exchange.conn, &mut conn, exchange.framing).await?;
                    conn.flush().await?;

                    if let Some(client) = client.as_mut() {
                        client.finish(*exchange);
                    }
                    if !keep {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Handle one trusted request. Returns `None` when the connection
    /// was consumed (tunnel or relay), otherwise the outcome to write.
    async fn proxy_request<S>(
        &self,
        req: &Request,
        conn: &mut BufferedStream<S>,
        client: &mut Option<UpstreamClient>,
        router: &Router,
        peer: Option<SocketAddr>,
    ) -> Result<Option<Outcome>>
    where
        S: StreamDyn,
    {
        let (scheme, dest) = match http_target(req) {
            Ok(target) => target,
            Err(e) => {
                debug!("unusable request target {}: {:#}", req.target, e);
                return Ok(Some(Outcome::Respond(simple_response(req.version, 400))));
            }
        };

        let metadata = Metadata {
            remote_addr: peer,
            dest,
            auth: None,
        };
        let outbound = router.route(&metadata);

        let mut dest = metadata.dest;
        if let Some(domain) = dest.domain_name().map(String::from) {
            if !dest.is_resolved() {
                match outbound.resolve(&domain).await {
                    Ok(ip) => dest.set_resolved(ip),
                    Err(e) => {
                        warn!("failed to resolve {}: {:#}", domain, e);
                        let mut resp = simple_response(req.version, 502);
                        finalize_headers(&mut resp.headers, false);
                        conn.write_all(&response_head_bytes(&resp)).await?;
                        conn.flush().await?;
                        return Ok(None);
                    }
                }
            }
        }

        if req.method.eq_ignore_ascii_case("CONNECT") {
            let target = match outbound.dial(&dest.dial_addr()).await {
                Ok(target) => target,
                Err(e) => {
                    warn!("CONNECT to {} failed: {}", dest, e);
                    let mut resp = simple_response(req.version, 502);
                    finalize_headers(&mut resp.headers, false);
                    conn.write_all(&response_head_bytes(&resp)).await?;
                    conn.flush().await?;
                    return Ok(None);
                }
            };

            // Written by hand so HTTP/1.0 CONNECT clients get the exact
            // line they expect.
            let established = format!(
                "HTTP/{}.{} 200 Connection established\r\n\r\n",
                req.version.0, req.version.1
            );
            conn.write_all(established.as_bytes()).await?;
            conn.flush().await?;

            info!("CONNECT tunnel to {}", dest);
            relay(conn, target).await;
            return Ok(None);
        }

        if is_upgrade_request(req) {
            let mut target = match outbound.dial(&dest.dial_addr()).await {
                Ok(target) => target,
                Err(e) => {
                    warn!("upgrade dial to {} failed: {}", dest, e);
                    let mut resp = simple_response(req.version, 502);
                    finalize_headers(&mut resp.headers, false);
                    conn.write_all(&response_head_bytes(&resp)).await?;
                    conn.flush().await?;
                    return Ok(None);
                }
            };

            // Hand the exchange to the peers untouched.
            target.write_all(&req.raw_head).await?;
            target.flush().await?;

            info!("upgrade pass-through to {}", dest);
            relay(conn, target).await;
            return Ok(None);
        }

        if scheme.is_empty() {
            return Ok(Some(Outcome::Respond(simple_response(req.version, 400))));
        }

        let mut outgoing = req.clone();
        let host = match req.header("Host").map(String::from) {
            Some(host) => host,
            None => match dest.domain_name() {
                Some(domain) => format!("{}:{}", domain, dest.port),
                None => dest.dial_addr(),
            },
        };
        set_header(&mut outgoing.headers, "Host", &host);
        let req_framing = request_framing(&outgoing);
        remove_hop_by_hop_headers(&mut outgoing.headers);
        remove_extra_host_port(&mut outgoing, &scheme);

        if client.is_none() {
            *client = Some(UpstreamClient::new(Arc::clone(&outbound))?);
        }
        let target = origin_form_target(&outgoing);
        match client
            .as_mut()
            .expect("created above")
            .send(&outgoing, req_framing, &scheme, &dest, &target, conn)
            .await
        {
            Ok(exchange) => Ok(Some(Outcome::Forward(Box::new(exchange)))),
            Err(e) => {
                warn!("forward to {} failed: {:#}", dest, e);
                Ok(Some(Outcome::Respond(simple_response(req.version, 502))))
            }
        }
    }
}

/// Apply the keep-alive response headers the proxy owes the client
fn finalize_headers(headers: &mut Vec<message::Header>, keep_alive: bool) {
    if keep_alive {
        set_header(headers, "Proxy-Connection", "keep-alive");
        set_header(headers, "Connection", "keep-alive");
        set_header(headers, "Keep-Alive", "timeout=4");
    } else {
        set_header(headers, "Connection", "close");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use crate::outbound::{DirectOutbound, Outbound, DIRECT};
    use std::collections::HashMap;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};
    use tokio::net::TcpListener;

    fn direct_router() -> Router {
        let mut outbounds: HashMap<String, Arc<dyn Outbound>> = HashMap::new();
        outbounds.insert(DIRECT.to_string(), Arc::new(DirectOutbound));
        let config = RouteConfig {
            final_outbound: Some(DIRECT.to_string()),
            rules: Vec::new(),
        };
        Router::new(&config, &outbounds).unwrap()
    }

    fn start_handler(inbound: HttpInbound) -> (tokio::task::JoinHandle<Result<()>>, DuplexStream) {
        let (client, server) = duplex(16 * 1024);
        let task = tokio::spawn(async move {
            let router = direct_router();
            inbound
                .handle(BufferedStream::new(server), &router, None)
                .await
        });
        (task, client)
    }

    async fn read_head_string(client: &mut DuplexStream) -> String {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            client.read_exact(&mut byte).await.unwrap();
            head.push(byte[0]);
        }
        String::from_utf8(head).unwrap()
    }

    /// Origin server answering with fixed responses over one connection
    async fn origin_server(listener: TcpListener, responses: Vec<Vec<u8>>) {
        let (conn, _) = listener.accept().await.unwrap();
        let mut conn = BufferedStream::new(conn);
        for response in responses {
            let req = message::read_request(&mut conn).await.unwrap().unwrap();
            assert!(req.target.starts_with('/'));
            assert!(req.header("Proxy-Connection").is_none());
            conn.write_all(&response).await.unwrap();
            conn.flush().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_forward_get_keep_alive_loops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let origin = tokio::spawn(origin_server(
            listener,
            vec![
                b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nfirst".to_vec(),
                b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nsecond".to_vec(),
            ],
        ));

        let (task, mut client) = start_handler(HttpInbound::new());

        for expected in ["first", "second"] {
            let request = format!(
                "GET http://{addr}/ HTTP/1.1\r\nHost: {addr}\r\nProxy-Connection: keep-alive\r\n\r\n"
            );
            client.write_all(request.as_bytes()).await.unwrap();

            let head = read_head_string(&mut client).await;
            assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head}");
            assert!(head.contains("Proxy-Connection: keep-alive\r\n"));
            assert!(head.contains("Connection: keep-alive\r\n"));
            assert!(head.contains("Keep-Alive: timeout=4\r\n"));

            let mut body = vec![0u8; expected.len()];
            client.read_exact(&mut body).await.unwrap();
            assert_eq!(body, expected.as_bytes());
        }

        drop(client);
        task.await.unwrap().unwrap();
        origin.await.unwrap();
    }

    #[tokio::test]
    async fn test_forward_without_keep_alive_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let origin = tokio::spawn(origin_server(
            listener,
            vec![b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec()],
        ));

        let (task, mut client) = start_handler(HttpInbound::new());

        let request = format!("GET http://{addr}/ HTTP/1.1\r\nHost: {addr}\r\n\r\n");
        client.write_all(request.as_bytes()).await.unwrap();

        let head = read_head_string(&mut client).await;
        assert!(head.contains("Connection: close\r\n"));
        let mut body = [0u8; 2];
        client.read_exact(&mut body).await.unwrap();

        // The handler must close after one exchange.
        let mut probe = [0u8; 1];
        assert_eq!(client.read(&mut probe).await.unwrap(), 0);
        task.await.unwrap().unwrap();
        origin.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_tunnel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let echo = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let (mut r, mut w) = conn.split();
            let _ = tokio::io::copy(&mut r, &mut w).await;
        });

        let (task, mut client) = start_handler(HttpInbound::new());

        let request = format!("CONNECT {addr} HTTP/1.1\r\nHost: {addr}\r\n\r\n");
        client.write_all(request.as_bytes()).await.unwrap();

        let head = read_head_string(&mut client).await;
        assert_eq!(head, "HTTP/1.1 200 Connection established\r\n\r\n");

        client.write_all(b"tunnel data").await.unwrap();
        let mut echoed = [0u8; 11];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"tunnel data");

        drop(client);
        task.await.unwrap().unwrap();
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_preserves_http_10_version() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let (task, mut client) = start_handler(HttpInbound::new());

        let request = format!("CONNECT {addr} HTTP/1.0\r\n\r\n");
        client.write_all(request.as_bytes()).await.unwrap();

        let head = read_head_string(&mut client).await;
        assert_eq!(head, "HTTP/1.0 200 Connection established\r\n\r\n");

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connect_dial_failure_is_502() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (task, mut client) = start_handler(HttpInbound::new());

        let request = format!("CONNECT {addr} HTTP/1.1\r\n\r\n");
        client.write_all(request.as_bytes()).await.unwrap();

        let head = read_head_string(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 502 Bad Gateway\r\n"), "{head}");
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_upgrade_request_is_relayed_raw() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let origin = tokio::spawn(async move {
            let (conn, _) = listener.accept().await.unwrap();
            let mut conn = BufferedStream::new(conn);
            let req = message::read_request(&mut conn).await.unwrap().unwrap();
            // The raw request includes the hop-by-hop upgrade headers.
            assert!(is_upgrade_request(&req));
            assert_eq!(req.header("Upgrade"), Some("websocket"));
            conn.write_all(
                b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n",
            )
            .await
            .unwrap();
            conn.flush().await.unwrap();
        });

        let (task, mut client) = start_handler(HttpInbound::new());

        let request = format!(
            "GET http://{addr}/chat HTTP/1.1\r\nHost: {addr}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n"
        );
        client.write_all(request.as_bytes()).await.unwrap();

        let head = read_head_string(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));

        drop(client);
        task.await.unwrap().unwrap();
        origin.await.unwrap();
    }

    #[tokio::test]
    async fn test_origin_form_without_scheme_is_400() {
        let (task, mut client) = start_handler(HttpInbound::new());

        client
            .write_all(b"GET /path HTTP/1.1\r\nHost: localhost:1\r\n\r\n")
            .await
            .unwrap();

        let head = read_head_string(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{head}");
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_502() {
        let (task, mut client) = start_handler(HttpInbound::new());

        client
            .write_all(
                b"GET http://does-not-exist-7f3a.invalid/ HTTP/1.1\r\nProxy-Connection: keep-alive\r\n\r\n",
            )
            .await
            .unwrap();

        let head = read_head_string(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 502 Bad Gateway\r\n"), "{head}");

        // Resolve failures close the connection even under keep-alive.
        let mut probe = [0u8; 1];
        assert_eq!(client.read(&mut probe).await.unwrap(), 0);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_authenticator_challenge_and_accept() {
        #[derive(Debug)]
        struct OnePair;
        impl ProxyAuthenticator for OnePair {
            fn verify(&self, user: &str, pass: &str) -> bool {
                user == "user" && pass == "pass"
            }
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let origin = tokio::spawn(origin_server(
            listener,
            vec![b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec()],
        ));

        let (task, mut client) =
            start_handler(HttpInbound::with_authenticator(Arc::new(OnePair)));

        // No credentials: challenged, connection stays open thanks to
        // keep-alive.
        let request = format!(
            "GET http://{addr}/ HTTP/1.1\r\nHost: {addr}\r\nProxy-Connection: keep-alive\r\n\r\n"
        );
        client.write_all(request.as_bytes()).await.unwrap();
        let head = read_head_string(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 407 "), "{head}");
        assert!(head.contains("Proxy-Authenticate: Basic\r\n"));

        // With credentials the request is proxied.
        use base64::Engine;
        let credential = base64::engine::general_purpose::STANDARD.encode("user:pass");
        let request = format!(
            "GET http://{addr}/ HTTP/1.1\r\nHost: {addr}\r\nProxy-Authorization: Basic {credential}\r\n\r\n"
        );
        client.write_all(request.as_bytes()).await.unwrap();
        let head = read_head_string(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head}");

        let mut body = [0u8; 2];
        client.read_exact(&mut body).await.unwrap();
        assert_eq!(&body, b"ok");

        drop(client);
        task.await.unwrap().unwrap();
        origin.await.unwrap();
    }
}
