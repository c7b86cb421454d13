//! Forward HTTP/HTTPS proxy with source-IP admission control.
//!
//! Serves plain HTTP forwarding and CONNECT tunnels over hyper, one task
//! per accepted connection. Admission, rule evaluation, and mode folding
//! all happen before any upstream byte is sent; every request produces
//! exactly one traffic log entry.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, BodyStream, Empty, Full, StreamBody};
use hyper::body::{Bytes, Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::OnUpgrade;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info};

use shield_fleet::FleetRegistry;
use shield_types::{ShieldError, TrafficAction, TrafficEntry};

use crate::inspect::{Inspector, RequestVerdict};
use crate::traffic::TrafficLog;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

type ProxyBody = UnsyncBoxBody<Bytes, std::io::Error>;

/// The outbound half of the shield: agents reach the internet only through
/// this proxy.
pub struct ForwardProxy {
    inspector: Arc<Inspector>,
    traffic: Arc<TrafficLog>,
    registry: Option<Arc<FleetRegistry>>,
    client: reqwest::Client,
}

impl ForwardProxy {
    /// A proxy without admission control: any source may connect. Used for
    /// standalone deployments where the host firewall scopes access.
    pub fn new(inspector: Arc<Inspector>, traffic: Arc<TrafficLog>) -> Result<Self, ShieldError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ShieldError::Config(format!("http client: {e}")))?;
        Ok(Self {
            inspector,
            traffic,
            registry: None,
            client,
        })
    }

    /// Attach a registry; unregistered source IPs are then rejected at
    /// admission with 403.
    pub fn with_registry(mut self, registry: Arc<FleetRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Accept loop. Each connection is served on its own task until the
    /// shutdown signal flips.
    pub async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        match listener.local_addr() {
            Ok(addr) => info!(addr = %addr, "forward proxy listening"),
            Err(_) => info!("forward proxy listening"),
        }
        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        let proxy = Arc::clone(&self);
                        tokio::spawn(async move {
                            proxy.serve_connection(stream, peer).await;
                        });
                    }
                    Err(e) => error!(error = %e, "forward proxy accept failed"),
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("forward proxy shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn serve_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let io = TokioIo::new(stream);
        let proxy = Arc::clone(&self);
        let service = service_fn(move |req| {
            let proxy = Arc::clone(&proxy);
            async move { Ok::<_, Infallible>(proxy.handle(req, peer).await) }
        });

        if let Err(e) = http1::Builder::new()
            .preserve_header_case(true)
            .serve_connection(io, service)
            .with_upgrades()
            .await
        {
            debug!(peer = %peer, error = %e, "proxy connection closed with error");
        }
    }

    /// Admission, decision, logging, then dispatch to CONNECT or plain HTTP.
    async fn handle(&self, req: Request<Incoming>, peer: SocketAddr) -> Response<ProxyBody> {
        let client_ip = peer.ip().to_string();
        let token = header_value(&req, "x-agent-token");
        let authority = request_authority(&req);
        let host = strip_port(&authority).to_lowercase();
        let method = req.method().clone();

        let (agent_id, tier) = match &self.registry {
            Some(registry) => match registry.validate_agent_ip(&client_ip) {
                Some(ident) => (Some(ident.agent_id), ident.tier),
                None => {
                    self.log_request(
                        &client_ip,
                        None,
                        token,
                        &host,
                        method.as_str(),
                        TrafficAction::Reject,
                        "source IP not registered",
                    );
                    return text_response(
                        StatusCode::FORBIDDEN,
                        "Forbidden: source IP not registered".into(),
                    );
                }
            },
            None => (None, String::new()),
        };

        let verdict = self
            .inspector
            .check_request(agent_id.as_deref().unwrap_or(""), &tier, &host);
        let action = if verdict.should_block {
            TrafficAction::Block
        } else if verdict.rule_matched {
            TrafficAction::Audit
        } else {
            TrafficAction::Allow
        };
        self.log_request(
            &client_ip,
            agent_id.as_deref(),
            token,
            &host,
            method.as_str(),
            action,
            &verdict.reason,
        );

        if method == Method::CONNECT {
            self.handle_connect(req, &authority, verdict).await
        } else {
            self.handle_http(req, &authority, verdict).await
        }
    }

    /// CONNECT: refuse before upgrading, dial before answering 200, then
    /// splice bytes until either side closes.
    async fn handle_connect(
        &self,
        req: Request<Incoming>,
        authority: &str,
        verdict: RequestVerdict,
    ) -> Response<ProxyBody> {
        if verdict.should_block {
            return text_response(
                StatusCode::FORBIDDEN,
                format!("Blocked by Plasma Shield: {}", verdict.reason),
            );
        }
        if authority.is_empty() {
            return text_response(StatusCode::BAD_GATEWAY, "Failed to connect to target: no host".into());
        }

        let target = match timeout(CONNECT_DIAL_TIMEOUT, TcpStream::connect(authority)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return text_response(
                    StatusCode::BAD_GATEWAY,
                    format!("Failed to connect to target: {e}"),
                )
            }
            Err(_) => {
                return text_response(
                    StatusCode::BAD_GATEWAY,
                    "Failed to connect to target: dial timed out".into(),
                )
            }
        };

        // The transport must be able to hand us the raw connection. hyper
        // marks an upgradable request by inserting OnUpgrade into its
        // extensions; without it no tunnel can be established.
        if req.extensions().get::<OnUpgrade>().is_none() {
            return text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Connection upgrade not supported".into(),
            );
        }

        let upgrade = hyper::upgrade::on(req);
        tokio::spawn(async move {
            match upgrade.await {
                Ok(upgraded) => splice(TokioIo::new(upgraded), target).await,
                Err(e) => debug!(error = %e, "CONNECT upgrade failed"),
            }
        });

        Response::new(empty_body())
    }

    /// Plain HTTP: rebuild the outbound request, stream both bodies, relay
    /// the response verbatim (redirects included).
    async fn handle_http(
        &self,
        req: Request<Incoming>,
        authority: &str,
        verdict: RequestVerdict,
    ) -> Response<ProxyBody> {
        if verdict.should_block {
            return text_response(
                StatusCode::FORBIDDEN,
                format!("Blocked by Plasma Shield: {}", verdict.reason),
            );
        }

        let (parts, body) = req.into_parts();
        let url = if parts.uri.scheme().is_some() {
            parts.uri.to_string()
        } else {
            if authority.is_empty() {
                return text_response(StatusCode::BAD_GATEWAY, "Upstream error: no host".into());
            }
            let path_and_query = parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            format!("http://{authority}{path_and_query}")
        };

        let mut headers = parts.headers;
        headers.remove(hyper::header::HOST);
        headers.remove("proxy-connection");
        // The token authenticates the agent to the shield; it must never
        // reach the upstream.
        headers.remove("x-agent-token");

        let body_stream =
            BodyStream::new(body).try_filter_map(|frame| async move { Ok(frame.into_data().ok()) });

        let result = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body_stream))
            .send()
            .await;

        let upstream = match result {
            Ok(resp) => resp,
            Err(e) => {
                return text_response(StatusCode::BAD_GATEWAY, format!("Upstream error: {e}"))
            }
        };

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        // Framing is renegotiated on our side of the connection.
        headers.remove(hyper::header::TRANSFER_ENCODING);
        headers.remove(hyper::header::CONNECTION);
        let stream = upstream
            .bytes_stream()
            .map_ok(Frame::data)
            .map_err(std::io::Error::other);

        let mut response = Response::new(StreamBody::new(stream).boxed_unsync());
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }

    #[allow(clippy::too_many_arguments)]
    fn log_request(
        &self,
        source_ip: &str,
        agent_id: Option<&str>,
        token: Option<String>,
        domain: &str,
        method: &str,
        action: TrafficAction,
        reason: &str,
    ) {
        self.traffic.record(TrafficEntry {
            timestamp: Utc::now(),
            source_ip: Some(source_ip.to_string()),
            agent_id: agent_id.map(String::from),
            agent_token: token,
            domain: domain.to_string(),
            method: method.to_string(),
            action,
            reason: reason.to_string(),
        });
    }
}

/// The request target as `host[:port]`: URI authority for proxy-form and
/// CONNECT requests, the Host header otherwise.
fn request_authority(req: &Request<Incoming>) -> String {
    if let Some(authority) = req.uri().authority() {
        return authority.to_string();
    }
    req.headers()
        .get(hyper::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Strip a trailing `:port`, leaving the colons of an IPv6 literal alone.
fn strip_port(host: &str) -> &str {
    match host.rfind(':') {
        Some(idx) => match host.rfind(']') {
            Some(bracket) if bracket > idx => host,
            _ => &host[..idx],
        },
        None => host,
    }
}

fn header_value(req: &Request<Incoming>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn text_response(status: StatusCode, mut text: String) -> Response<ProxyBody> {
    text.push('\n');
    let body = Full::new(Bytes::from(text))
        .map_err(|never| match never {})
        .boxed_unsync();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

/// Copy bytes both ways until either direction finishes, then drop both
/// sockets. Waiting for both directions would leak a tunnel whose peer is
/// gone.
async fn splice<A, B>(client: A, target: B)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut target_read, mut target_write) = tokio::io::split(target);
    tokio::select! {
        _ = tokio::io::copy(&mut client_read, &mut target_write) => {}
        _ = tokio::io::copy(&mut target_read, &mut client_write) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_port_handles_ipv6() {
        assert_eq!(strip_port("example.com:443"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("10.0.0.1:8080"), "10.0.0.1");
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
        assert_eq!(strip_port("[2001:db8::1]:443"), "[2001:db8::1]");
    }

    #[test]
    fn text_response_sets_status_and_body() {
        let resp = text_response(StatusCode::FORBIDDEN, "Blocked by Plasma Shield: r1".into());
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
