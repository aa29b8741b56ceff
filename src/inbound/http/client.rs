//! Session-scoped upstream HTTP client.
//!
//! Performs one request/response exchange at a time over connections
//! dialed through the selected egress. Connections whose responses are
//! cleanly delimited are kept for reuse within the session; nothing is
//! pooled across sessions. Upstream TLS is used for https targets.
//! Redirects are never followed; the upstream's response is returned
//! verbatim.

use super::message::{
    copy_body, read_response_head, request_head_bytes, set_header, BodyFraming, Request, Response,
};
use crate::net::{BufferedStream, StreamDyn, TargetAddr};
use crate::outbound::{Outbound, ProxyStream};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Idle upstream connections older than this are not reused
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);
/// Upper bound on the upstream TLS handshake
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

struct IdleConn {
    conn: BufferedStream<Box<dyn ProxyStream>>,
    last_used: Instant,
}

/// One proxied request/response exchange in flight.
///
/// The response head has been read; the body is still sitting in `conn`
/// and is streamed out by the caller, after which the exchange goes back
/// to [`UpstreamClient::finish`].
pub struct Exchange {
    /// Upstream response head
    pub response: Response,
    /// How the response body is delimited
    pub framing: BodyFraming,
    pub(crate) conn: BufferedStream<Box<dyn ProxyStream>>,
    pub(crate) reuse_key: Option<String>,
}

/// HTTP client whose transport dials through a fixed egress
pub struct UpstreamClient {
    outbound: Arc<dyn Outbound>,
    tls: TlsConnector,
    idle: HashMap<String, IdleConn>,
}

impl UpstreamClient {
    /// Create a client dialing through `outbound`
    pub fn new(outbound: Arc<dyn Outbound>) -> Result<Self> {
        let mut root_store = RootCertStore::empty();
        let native_certs = rustls_native_certs::load_native_certs();
        for cert in native_certs.certs {
            root_store.add(cert).ok();
        }

        let config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Ok(UpstreamClient {
            outbound,
            tls: TlsConnector::from(Arc::new(config)),
            idle: HashMap::new(),
        })
    }

    /// Send one request upstream and read the response head.
    ///
    /// The request head must already be rewritten for the upstream hop
    /// (hop-by-hop headers stripped); `req_framing` is the framing of
    /// the request body still unread on `client_conn`.
    pub async fn send<S>(
        &mut self,
        req: &Request,
        req_framing: BodyFraming,
        scheme: &str,
        dest: &TargetAddr,
        target: &str,
        client_conn: &mut BufferedStream<S>,
    ) -> Result<Exchange>
    where
        S: StreamDyn,
    {
        let key = format!("{}://{}", scheme, dest.dial_addr());
        let mut conn = match self.checkout(&key) {
            Some(conn) => conn,
            None => self.connect(scheme, dest).await?,
        };

        // Framing headers were stripped with the other hop-by-hop
        // headers; restore the one the body copy will honor.
        let mut outgoing = req.clone();
        if req_framing == BodyFraming::Chunked {
            set_header(&mut outgoing.headers, "Transfer-Encoding", "chunked");
        }

        conn.write_all(&request_head_bytes(&outgoing, target))
            .await
            .context("writing request to upstream")?;
        copy_body(client_conn, &mut conn, req_framing)
            .await
            .context("forwarding request body")?;

        let mut response = read_response_head(&mut conn).await?;
        // Interim responses precede the real one.
        while response.status == 100 {
            response = read_response_head(&mut conn).await?;
        }

        let framing = super::message::response_framing(&req.method, &response);
        let reusable = !matches!(framing, BodyFraming::UntilClose)
            && response.status != 101
            && !wants_close(&response);

        Ok(Exchange {
            response,
            framing,
            conn,
            reuse_key: reusable.then(|| key),
        })
    }

    /// Return a finished exchange's connection to the idle set when it
    /// is reusable.
    pub fn finish(&mut self, exchange: Exchange) {
        if let Some(key) = exchange.reuse_key {
            self.idle.insert(
                key,
                IdleConn {
                    conn: exchange.conn,
                    last_used: Instant::now(),
                },
            );
        }
    }

    fn checkout(&mut self, key: &str) -> Option<BufferedStream<Box<dyn ProxyStream>>> {
        let idle = self.idle.remove(key)?;
        if idle.last_used.elapsed() < IDLE_TIMEOUT {
            debug!("reusing upstream connection for {}", key);
            Some(idle.conn)
        } else {
            None
        }
    }

    async fn connect(
        &self,
        scheme: &str,
        dest: &TargetAddr,
    ) -> Result<BufferedStream<Box<dyn ProxyStream>>> {
        let stream = self.outbound.dial(&dest.dial_addr()).await?;

        let stream: Box<dyn ProxyStream> = if scheme == "https" {
            let server_name = match dest.domain_name() {
                Some(domain) => ServerName::try_from(domain.to_string())
                    .with_context(|| format!("invalid TLS server name: {}", domain))?,
                None => {
                    let ip = dest
                        .ip_addr()
                        .context("destination has neither domain nor IP")?;
                    ServerName::IpAddress(ip.into())
                }
            };

            let tls_stream =
                tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, self.tls.connect(server_name, stream))
                    .await
                    .with_context(|| format!("TLS handshake timeout with {}", dest))?
                    .with_context(|| format!("TLS handshake failed with {}", dest))?;
            Box::new(tls_stream)
        } else {
            stream
        };

        Ok(BufferedStream::new(stream))
    }
}

fn wants_close(resp: &Response) -> bool {
    resp.header("Connection")
        .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("close")))
        .unwrap_or(false)
}
