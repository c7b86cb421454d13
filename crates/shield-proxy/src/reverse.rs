//! Reverse proxy: inbound requests to agents with tenant scoping and
//! identity masking.
//!
//! Routes `ANY /agent/{agent_id}/{tail}` to the target agent's webhook.
//! Callers authenticate with a bearer token bound to a tenant; the agent
//! only ever sees a request from "the Captain", never the concrete caller.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use chrono::Utc;
use tracing::info;
use url::Url;

use shield_fleet::FleetRegistry;
use shield_types::ShieldError;

const FORWARD_TIMEOUT: Duration = Duration::from_secs(60);

/// Port used to reach an agent by IP when no webhook URL is registered.
pub const DEFAULT_WEBHOOK_PORT: u16 = 18789;

/// Uniform body for authorization failures. One text for both unknown
/// tenants and foreign agents, so responses cannot be used as an
/// enumeration oracle.
const FORBIDDEN_MESSAGE: &str = "Forbidden: access denied";

/// Headers terminated at the proxy: hop-by-hop headers plus the caller's
/// credentials.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "authorization",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Headers that could reveal the true origin of the request. This list is
/// the identity-masking contract: anything matching it never reaches an
/// agent.
const IDENTITY_HEADERS: &[&str] = &[
    "x-forwarded-for",
    "x-real-ip",
    "x-originating-ip",
    "x-remote-ip",
    "x-remote-addr",
    "x-client-ip",
    "x-agent-id",
    "x-source-agent",
];

/// Whether a request header must be dropped before forwarding.
pub fn is_stripped_header(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .chain(IDENTITY_HEADERS.iter())
        .any(|h| name.eq_ignore_ascii_case(h))
}

/// The inbound half of the shield.
pub struct ReverseProxy {
    registry: Arc<FleetRegistry>,
    tokens: RwLock<HashMap<String, String>>,
    client: reqwest::Client,
}

impl ReverseProxy {
    pub fn new(registry: Arc<FleetRegistry>) -> Result<Self, ShieldError> {
        let client = reqwest::Client::builder()
            .timeout(FORWARD_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ShieldError::Config(format!("http client: {e}")))?;
        Ok(Self {
            registry,
            tokens: RwLock::new(HashMap::new()),
            client,
        })
    }

    /// Register a bearer token for a tenant.
    pub fn register_token(&self, token: &str, tenant_id: &str) {
        self.tokens
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(token.to_string(), tenant_id.to_string());
    }

    /// The axum router serving `/agent/{agent_id}/...`.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/agent/{agent_id}", any(handle_agent_root))
            .route("/agent/{agent_id}/{*tail}", any(handle_agent))
            .fallback(handle_not_found)
            .with_state(self)
    }

    async fn serve(&self, agent_id: String, tail: String, req: Request) -> Response {
        let Some(token) = bearer_token(req.headers()) else {
            return json_error(StatusCode::UNAUTHORIZED, "Unauthorized: missing bearer token");
        };
        let tenant_id = {
            let tokens = self.tokens.read().unwrap_or_else(|e| e.into_inner());
            tokens.get(&token).cloned()
        };
        let Some(tenant_id) = tenant_id else {
            return json_error(StatusCode::UNAUTHORIZED, "Unauthorized: invalid token");
        };

        // Unknown tenant and foreign agent produce the same answer: the
        // response must not disclose what exists outside the caller's fleet.
        let Some(tenant) = self.registry.get_tenant(&tenant_id) else {
            return json_error(StatusCode::FORBIDDEN, FORBIDDEN_MESSAGE);
        };
        let Some(agent) = tenant.agents.get(&agent_id) else {
            return json_error(StatusCode::FORBIDDEN, FORBIDDEN_MESSAGE);
        };

        let base = match agent.webhook_url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => url.to_string(),
            None => match agent.ip.as_deref().filter(|ip| !ip.is_empty()) {
                Some(ip) => format!("http://{ip}:{DEFAULT_WEBHOOK_PORT}"),
                None => {
                    return json_error(
                        StatusCode::BAD_GATEWAY,
                        "Bad gateway: agent has no endpoint configured",
                    )
                }
            },
        };
        let mut target = match Url::parse(&base) {
            Ok(url) => url,
            Err(_) => return json_error(StatusCode::BAD_GATEWAY, "Bad gateway: invalid agent URL"),
        };
        let path = if tail.is_empty() {
            "/".to_string()
        } else {
            format!("/{tail}")
        };
        target.set_path(&path);
        target.set_query(req.uri().query());

        let captain = tenant
            .captain_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| tenant_id.clone());

        let record = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "direction": "inbound",
            "tenant": tenant_id,
            "agent": agent_id,
            "method": req.method().as_str(),
            "path": path,
            "action": "forward",
        });
        info!(target: "shield::inbound", "{record}");

        self.forward(req, target, &captain).await
    }

    /// Forward with identity masking: drop hop-by-hop and identity headers,
    /// synthesize the Captain identity, stream both bodies.
    async fn forward(&self, req: Request, target: Url, captain: &str) -> Response {
        let (parts, body) = req.into_parts();

        let mut headers = HeaderMap::new();
        for (name, value) in parts.headers.iter() {
            if name == axum::http::header::HOST || is_stripped_header(name.as_str()) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        match HeaderValue::from_str(captain) {
            Ok(value) => {
                headers.insert("x-captain", value);
            }
            Err(_) => {
                return json_error(StatusCode::BAD_GATEWAY, "Bad gateway: invalid captain name")
            }
        }
        headers.insert("x-plasma-shield", HeaderValue::from_static("true"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));

        let result = self
            .client
            .request(parts.method, target)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await;

        match result {
            Ok(upstream) => {
                let status = upstream.status();
                let mut response_headers = upstream.headers().clone();
                // Framing is renegotiated on our side of the connection.
                response_headers.remove(axum::http::header::TRANSFER_ENCODING);
                response_headers.remove(axum::http::header::CONNECTION);
                let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
                *response.status_mut() = status;
                *response.headers_mut() = response_headers;
                response
            }
            Err(e) => json_error(StatusCode::BAD_GATEWAY, format!("Bad gateway: {e}")),
        }
    }
}

async fn handle_agent(
    State(proxy): State<Arc<ReverseProxy>>,
    Path((agent_id, tail)): Path<(String, String)>,
    req: Request,
) -> Response {
    proxy.serve(agent_id, tail, req).await
}

async fn handle_agent_root(
    State(proxy): State<Arc<ReverseProxy>>,
    Path(agent_id): Path<String>,
    req: Request,
) -> Response {
    proxy.serve(agent_id, String::new(), req).await
}

async fn handle_not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "Not found: use /agent/{agent-id}/...")
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Extract a bearer token from the Authorization header, scheme
/// case-insensitive.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth = headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let (scheme, token) = auth.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));

        headers.insert("authorization", HeaderValue::from_static("bearer xyz"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("xyz"));

        headers.insert("authorization", HeaderValue::from_static("BEARER tok"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("tok"));

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_none());

        headers.insert("authorization", HeaderValue::from_static("Bearer"));
        assert!(bearer_token(&headers).is_none());
    }

    #[test]
    fn strip_list_covers_identity_and_hop_by_hop() {
        for name in [
            "Authorization",
            "Connection",
            "Keep-Alive",
            "Proxy-Authenticate",
            "Proxy-Authorization",
            "TE",
            "Trailers",
            "Transfer-Encoding",
            "Upgrade",
            "X-Forwarded-For",
            "X-Real-Ip",
            "X-Originating-Ip",
            "X-Remote-Ip",
            "X-Remote-Addr",
            "X-Client-Ip",
            "X-Agent-Id",
            "X-Source-Agent",
        ] {
            assert!(is_stripped_header(name), "{name} must be stripped");
            assert!(is_stripped_header(&name.to_lowercase()));
            assert!(is_stripped_header(&name.to_uppercase()));
        }
        for name in ["Content-Type", "Accept", "X-Request-Id", "User-Agent"] {
            assert!(!is_stripped_header(name), "{name} must pass through");
        }
    }
}
