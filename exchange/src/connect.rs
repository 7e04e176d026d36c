use crate::adapter::AdapterError;

use bytes::Bytes;
use fastwebsockets::FragmentCollector;
use http_body_util::Empty;
use hyper::{
    Request,
    header::{CONNECTION, UPGRADE},
    upgrade::Upgraded,
};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpStream;
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName},
};
use url::Url;

use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const WS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Idle time after which a trade stream is treated as half-open and reconnected.
pub const WS_READ_TIMEOUT: Duration = Duration::from_secs(45);

pub static TLS_CONNECTOR: LazyLock<TlsConnector> = LazyLock::new(tls_connector);

/// Client config trusting the bundled webpki roots.
fn tls_connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));

    TlsConnector::from(Arc::new(
        ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    ))
}

pub type WsStream = FragmentCollector<TokioIo<Upgraded>>;

pub enum State {
    Disconnected,
    Connected(WsStream),
}

/// Where a websocket connection goes, validated before any socket is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
struct WsTarget {
    host: String,
    port: u16,
    secure: bool,
    /// request target, `/` when the url has no path
    path: String,
    /// `Host` header value, carrying the port only when it is not the scheme default
    authority: String,
}

impl WsTarget {
    fn parse(domain: &str, url: &str) -> Result<Self, AdapterError> {
        let invalid = AdapterError::InvalidRequest;

        let parsed = Url::parse(url).map_err(|e| invalid(format!("{url}: {e}")))?;

        let secure = match parsed.scheme() {
            "wss" => true,
            "ws" => false,
            other => return Err(invalid(format!("unsupported websocket scheme {other:?}"))),
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| invalid(format!("{url}: missing host")))?;
        if !host.eq_ignore_ascii_case(domain) {
            return Err(invalid(format!("{url}: host {host} does not match {domain}")));
        }

        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| invalid(format!("{url}: missing port")))?;

        let mut path = match parsed.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        let authority = match parsed.port() {
            Some(explicit) => format!("{domain}:{explicit}"),
            None => domain.to_string(),
        };

        Ok(Self {
            host: domain.to_string(),
            port,
            secure,
            path,
            authority,
        })
    }
}

async fn within<T>(
    limit: Duration,
    stage: &str,
    fut: impl Future<Output = Result<T, AdapterError>>,
) -> Result<T, AdapterError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| AdapterError::WebsocketError(format!("{stage} timed out after {limit:?}")))?
}

/// Opens a websocket to `url`, which must point at `domain`.
pub async fn connect_ws(domain: &str, url: &str) -> Result<WsStream, AdapterError> {
    let target = WsTarget::parse(domain, url)?;
    let tcp = within(TCP_CONNECT_TIMEOUT, "TCP connect", setup_tcp(&target)).await?;

    if target.secure {
        let tls = within(TLS_HANDSHAKE_TIMEOUT, "TLS handshake", upgrade_to_tls(&target, tcp)).await?;
        within(WS_HANDSHAKE_TIMEOUT, "websocket handshake", handshake(&target, tls)).await
    } else {
        within(WS_HANDSHAKE_TIMEOUT, "websocket handshake", handshake(&target, tcp)).await
    }
}

async fn setup_tcp(target: &WsTarget) -> Result<TcpStream, AdapterError> {
    let addr = (target.host.as_str(), target.port);
    let tcp = TcpStream::connect(addr)
        .await
        .map_err(|e| AdapterError::WebsocketError(format!("{}:{}: {e}", addr.0, addr.1)))?;

    tcp.set_nodelay(true)
        .map_err(|e| AdapterError::WebsocketError(e.to_string()))?;

    log::debug!("TCP connected to {}:{}", addr.0, addr.1);
    Ok(tcp)
}

async fn upgrade_to_tls<S>(
    target: &WsTarget,
    stream: S,
) -> Result<tokio_rustls::client::TlsStream<S>, AdapterError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let server_name = ServerName::try_from(target.host.as_str())
        .map_err(|_| AdapterError::InvalidRequest(format!("invalid DNS name {}", target.host)))?;

    TLS_CONNECTOR
        .connect(server_name, stream)
        .await
        .map_err(|e| AdapterError::WebsocketError(e.to_string()))
}

async fn handshake<S>(target: &WsTarget, stream: S) -> Result<WsStream, AdapterError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let req: Request<Empty<Bytes>> = Request::builder()
        .method("GET")
        .uri(target.path.as_str())
        .header("Host", target.authority.as_str())
        .header(UPGRADE, "websocket")
        .header(CONNECTION, "upgrade")
        .header("Sec-WebSocket-Key", fastwebsockets::handshake::generate_key())
        .header("Sec-WebSocket-Version", "13")
        .body(Empty::<Bytes>::new())
        .map_err(|e| AdapterError::WebsocketError(e.to_string()))?;

    let (ws, _) = fastwebsockets::handshake::client(&TokioExecutor::new(), req, stream)
        .await
        .map_err(|e| AdapterError::WebsocketError(e.to_string()))?;

    Ok(FragmentCollector::new(ws))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports_stay_out_of_the_host_header() {
        let target = WsTarget::parse(
            "fstream.binance.com",
            "wss://fstream.binance.com/ws/btcusdt@aggTrade",
        )
        .unwrap();

        assert!(target.secure);
        assert_eq!(target.port, 443);
        assert_eq!(target.path, "/ws/btcusdt@aggTrade");
        assert_eq!(target.authority, "fstream.binance.com");
    }

    #[test]
    fn explicit_ports_and_queries_are_kept() {
        let target =
            WsTarget::parse("localhost", "ws://localhost:9001/stream?streams=a/b").unwrap();

        assert!(!target.secure);
        assert_eq!(target.port, 9001);
        assert_eq!(target.path, "/stream?streams=a/b");
        assert_eq!(target.authority, "localhost:9001");
    }

    #[test]
    fn rejects_bad_targets() {
        for url in [
            "wss://example.com/ws",
            "not a url",
            "https://stream.binance.com/ws",
        ] {
            assert!(matches!(
                WsTarget::parse("stream.binance.com", url),
                Err(AdapterError::InvalidRequest(_))
            ));
        }
    }

    #[tokio::test]
    async fn connect_fails_before_dialing_a_mismatched_host() {
        let result = connect_ws("stream.binance.com", "wss://example.com/ws").await;
        assert!(matches!(result, Err(AdapterError::InvalidRequest(_))));
    }
}
