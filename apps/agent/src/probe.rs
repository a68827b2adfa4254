//! Timed HTTP probe with per-phase instrumentation.
//!
//! One call performs exactly one physical attempt: DNS resolution, TCP
//! connect, TLS handshake (https only) and a minimal `GET` are all
//! executed on the same connection so the phase timings describe the
//! request that actually produced the response.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use hickory_resolver::TokioResolver;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use url::Url;

const USER_AGENT: &str = concat!("vigil-agent/", env!("CARGO_PKG_VERSION"));

/// Response head larger than this is treated as malformed.
const MAX_HEAD_BYTES: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("url has no host")]
    MissingHost,

    #[error("dns lookup failed: {0}")]
    Dns(String),

    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("tls handshake failed: {0}")]
    Tls(#[source] std::io::Error),

    #[error("request failed: {0}")]
    Io(#[source] std::io::Error),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
}

/// Timings and status captured by one successful probe.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    /// Probe start, UTC.
    pub started_at: DateTime<Utc>,
    pub status_code: u16,
    /// Status line text, e.g. "200 OK".
    pub status_text: String,
    pub dns_ms: i64,
    pub connect_ms: i64,
    pub tls_ms: i64,
    pub firstbyte_ms: i64,
}

/// Reusable probe executor. Holds only the resolver and the TLS
/// connector; every timing is a per-call local, so a single tracer can
/// be shared by any number of workers without leaking state between
/// probes.
pub struct ProbeTracer {
    resolver: TokioResolver,
    tls: TlsConnector,
}

impl ProbeTracer {
    pub fn new() -> Self {
        let resolver = TokioResolver::builder_with_config(
            ResolverConfig::cloudflare(),
            TokioConnectionProvider::default(),
        )
        .build();

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();

        Self { resolver, tls: TlsConnector::from(Arc::new(tls_config)) }
    }

    /// Perform one timed GET against `raw_url`, bounded by `deadline`.
    pub async fn probe(&self, raw_url: &str, deadline: Duration) -> Result<ProbeReport, ProbeError> {
        let started_at = Utc::now();
        let begin = Instant::now();

        match tokio::time::timeout(deadline, self.probe_once(raw_url, begin)).await {
            Ok(Ok(mut report)) => {
                report.started_at = started_at;
                Ok(report)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ProbeError::Timeout(deadline)),
        }
    }

    async fn probe_once(&self, raw_url: &str, begin: Instant) -> Result<ProbeReport, ProbeError> {
        let url = Url::parse(raw_url)?;
        let https = match url.scheme() {
            "http" => false,
            "https" => true,
            other => return Err(ProbeError::UnsupportedScheme(other.to_string())),
        };
        let host = url.host_str().ok_or(ProbeError::MissingHost)?.to_string();
        let port = url.port_or_known_default().unwrap_or(if https { 443 } else { 80 });

        // Validate the TLS name before any network work.
        let server_name = if https {
            Some(ServerName::try_from(host.clone()).map_err(|e| {
                ProbeError::Tls(std::io::Error::other(format!("invalid server name {host}: {e}")))
            })?)
        } else {
            None
        };

        // DNS phase. IP-literal hosts resolve for free.
        let (addr, dns_ms) = match host.parse::<IpAddr>() {
            Ok(ip) => (ip, 0),
            Err(_) => {
                let dns_start = Instant::now();
                let lookup = self
                    .resolver
                    .lookup_ip(host.as_str())
                    .await
                    .map_err(|e| ProbeError::Dns(e.to_string()))?;
                let ip = lookup
                    .iter()
                    .next()
                    .ok_or_else(|| ProbeError::Dns(format!("no addresses for {host}")))?;
                (ip, elapsed_ms(dns_start))
            }
        };

        // TCP connect phase.
        let connect_start = Instant::now();
        let stream = TcpStream::connect((addr, port)).await.map_err(ProbeError::Connect)?;
        let connect_ms = elapsed_ms(connect_start);

        let target = request_target(&url);

        let (tls_ms, response) = match server_name {
            Some(server_name) => {
                let tls_start = Instant::now();
                let mut tls_stream =
                    self.tls.connect(server_name, stream).await.map_err(ProbeError::Tls)?;
                let tls_ms = elapsed_ms(tls_start);
                (tls_ms, exchange(&mut tls_stream, &host, &target, begin).await?)
            }
            None => {
                let mut stream = stream;
                (0, exchange(&mut stream, &host, &target, begin).await?)
            }
        };

        let (status_code, status_text, firstbyte_ms) = response;

        Ok(ProbeReport {
            // overwritten by probe() with the wall-clock start
            started_at: Utc::now(),
            status_code,
            status_text,
            dns_ms,
            connect_ms,
            tls_ms,
            firstbyte_ms,
        })
    }
}

fn elapsed_ms(since: Instant) -> i64 {
    since.elapsed().as_millis() as i64
}

fn request_target(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Write the request and read the response head, recording the time of
/// the first response byte relative to `begin`.
async fn exchange<S>(
    stream: &mut S,
    host: &str,
    target: &str,
    begin: Instant,
) -> Result<(u16, String, i64), ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!(
        "GET {target} HTTP/1.1\r\n\
         Host: {host}\r\n\
         User-Agent: {USER_AGENT}\r\n\
         Accept: */*\r\n\
         Connection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.map_err(ProbeError::Io)?;

    let mut head = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    let mut firstbyte_ms = None;

    loop {
        let n = stream.read(&mut chunk).await.map_err(ProbeError::Io)?;
        if n == 0 {
            break;
        }
        if firstbyte_ms.is_none() {
            firstbyte_ms = Some(begin.elapsed().as_millis() as i64);
        }
        head.extend_from_slice(&chunk[..n]);
        // Only the status line is needed.
        if head.contains(&b'\n') || head.len() >= MAX_HEAD_BYTES {
            break;
        }
    }

    let firstbyte_ms =
        firstbyte_ms.ok_or_else(|| ProbeError::MalformedResponse("empty response".into()))?;
    let (status_code, status_text) = parse_status_line(&head)?;

    Ok((status_code, status_text, firstbyte_ms))
}

/// Parse "HTTP/1.1 200 OK" into `(200, "200 OK")`.
fn parse_status_line(head: &[u8]) -> Result<(u16, String), ProbeError> {
    let line_end = head.iter().position(|&b| b == b'\n').unwrap_or(head.len());
    let line = String::from_utf8_lossy(&head[..line_end]);
    let line = line.trim_end_matches(['\r', '\n']);

    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(ProbeError::MalformedResponse(format!("bad status line: {line:?}")));
    }
    let code = parts
        .next()
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| ProbeError::MalformedResponse(format!("bad status code: {line:?}")))?;

    let text = match parts.next() {
        Some(reason) if !reason.is_empty() => format!("{code} {reason}"),
        _ => code.to_string(),
    };

    Ok((code, text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn status_line_parsing() {
        let (code, text) = parse_status_line(b"HTTP/1.1 200 OK\r\n").unwrap();
        assert_eq!(code, 200);
        assert_eq!(text, "200 OK");

        let (code, text) = parse_status_line(b"HTTP/1.0 404 Not Found\r\nServer: x\r\n").unwrap();
        assert_eq!(code, 404);
        assert_eq!(text, "404 Not Found");

        // reason phrase is optional
        let (code, text) = parse_status_line(b"HTTP/2 204\r\n").unwrap();
        assert_eq!(code, 204);
        assert_eq!(text, "204");

        assert!(parse_status_line(b"SSH-2.0-OpenSSH\r\n").is_err());
        assert!(parse_status_line(b"HTTP/1.1 banana\r\n").is_err());
    }

    #[tokio::test]
    async fn probe_reports_status_and_sane_timings() {
        let addr = testutil::spawn_http_server("HTTP/1.1 200 OK", "hello", Duration::ZERO).await;
        let tracer = ProbeTracer::new();

        let total = Instant::now();
        let report = tracer
            .probe(&format!("http://{addr}/health"), Duration::from_secs(5))
            .await
            .unwrap();
        let total_ms = total.elapsed().as_millis() as i64;

        assert_eq!(report.status_code, 200);
        assert_eq!(report.status_text, "200 OK");
        // IP-literal host, plain http
        assert_eq!(report.dns_ms, 0);
        assert_eq!(report.tls_ms, 0);
        assert!(report.connect_ms >= 0 && report.connect_ms <= total_ms);
        assert!(report.firstbyte_ms >= 0 && report.firstbyte_ms <= total_ms);
    }

    #[tokio::test]
    async fn probe_times_out_against_silent_server() {
        let addr = testutil::spawn_silent_server().await;
        let tracer = ProbeTracer::new();

        let err = tracer
            .probe(&format!("http://{addr}/"), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Timeout(_)));
        assert!(!err.to_string().is_empty());
    }

    #[tokio::test]
    async fn probe_reports_connection_refused() {
        // Bind-then-drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let tracer = ProbeTracer::new();
        let err = tracer
            .probe(&format!("http://{addr}/"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Connect(_)));
    }

    #[tokio::test]
    async fn invalid_tls_server_name_is_a_tls_error() {
        let tracer = ProbeTracer::new();
        // underscores are legal in a URL host but not in a TLS name
        let err = tracer
            .probe("https://bad_host.example/", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Tls(_)));
        assert!(err.to_string().contains("invalid server name"));
    }

    #[tokio::test]
    async fn probe_rejects_non_http_schemes() {
        let tracer = ProbeTracer::new();
        let err = tracer.probe("ftp://example.com/", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ProbeError::UnsupportedScheme(_)));
    }
}
