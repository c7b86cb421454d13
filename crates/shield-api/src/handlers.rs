//! Route handlers for the management plane.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use shield_rules::{Rule, RuleSet};
use shield_types::{Agent, FleetMode, Mode, TrafficAction, TrafficEntry};

use crate::types::*;
use crate::ApiContext;

/// Build the management router over the shared context.
pub fn router(ctx: Arc<ApiContext>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/agents", get(list_agents))
        .route("/agents/{id}/pause", post(pause_agent))
        .route("/agents/{id}/kill", post(kill_agent))
        .route("/agents/{id}/resume", post(resume_agent))
        .route("/rules", get(list_rules).post(create_rule))
        .route("/rules/{id}", delete(delete_rule))
        .route("/logs", get(list_logs))
        .route("/grants", get(list_grants).post(create_grant))
        .route("/grants/{id}", delete(delete_grant))
        .route("/bastion/sessions", get(list_sessions))
        .route("/exec/check", post(exec_check))
        .route("/mode", get(get_mode).put(set_mode))
        .route(
            "/agent/{id}/mode",
            get(get_agent_mode).put(set_agent_mode).delete(clear_agent_mode),
        )
        .route("/fleet/mode", get(get_fleet_mode).put(set_fleet_mode))
        .route("/fleet/agents", get(fleet_agents).post(add_fleet_agent))
        .route("/fleet/can-communicate", get(can_communicate))
        .with_state(ctx)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            code: status.as_u16(),
        }),
    )
        .into_response()
}

/// Constant-time byte comparison to prevent timing side channels on the
/// management token.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (&x, &y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Check the management bearer token if one is configured.
fn check_auth(ctx: &ApiContext, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = ctx.auth_token() else {
        return Ok(());
    };
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token);
    match presented {
        None => Err(error_response(
            StatusCode::UNAUTHORIZED,
            "missing authorization token",
        )),
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => Ok(()),
        Some(_) => Err(error_response(
            StatusCode::FORBIDDEN,
            "invalid management token",
        )),
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn status(State(ctx): State<Arc<ApiContext>>, headers: HeaderMap) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    let (requests_total, blocked_total) = ctx.traffic.totals();
    let uptime = Utc::now() - ctx.started_at();
    // Whole seconds for display.
    let uptime = std::time::Duration::from_secs(uptime.num_seconds().max(0) as u64);
    let uptime = humantime::format_duration(uptime).to_string();
    Json(StatusResponse {
        status: "operational".into(),
        version: ctx.version.into(),
        uptime,
        started_at: ctx.started_at(),
        agent_count: ctx.agents().len(),
        rule_count: ctx.engine.rule_count(),
        requests_total,
        blocked_total,
    })
    .into_response()
}

async fn list_agents(State(ctx): State<Arc<ApiContext>>, headers: HeaderMap) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    let mut agents: Vec<AgentRecord> = ctx.agents().values().cloned().collect();
    agents.sort_by(|a, b| a.id.cmp(&b.id));
    let total = agents.len();
    Json(AgentListResponse { agents, total }).into_response()
}

async fn pause_agent(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    {
        let mut agents = ctx.agents_mut();
        let Some(record) = agents.get_mut(&id) else {
            return error_response(StatusCode::NOT_FOUND, "agent not found");
        };
        record.status = AgentState::Paused;
    }
    // Pausing is enforced on the data path, not just displayed.
    ctx.modes.set_agent_mode(&id, Mode::Lockdown);
    Json(AgentActionResponse {
        id,
        status: AgentState::Paused,
        message: "agent paused successfully - all traffic blocked".into(),
    })
    .into_response()
}

async fn kill_agent(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    {
        let mut agents = ctx.agents_mut();
        let Some(record) = agents.get_mut(&id) else {
            return error_response(StatusCode::NOT_FOUND, "agent not found");
        };
        record.status = AgentState::Killed;
    }
    ctx.modes.set_agent_mode(&id, Mode::Lockdown);
    Json(AgentActionResponse {
        id,
        status: AgentState::Killed,
        message: "agent killed - traffic blocked and alert sent".into(),
    })
    .into_response()
}

async fn resume_agent(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    {
        let mut agents = ctx.agents_mut();
        let Some(record) = agents.get_mut(&id) else {
            return error_response(StatusCode::NOT_FOUND, "agent not found");
        };
        if record.status == AgentState::Killed {
            return error_response(
                StatusCode::CONFLICT,
                "cannot resume killed agent - use agent restore instead",
            );
        }
        record.status = AgentState::Active;
    }
    ctx.modes.clear_agent_mode(&id);
    Json(AgentActionResponse {
        id,
        status: AgentState::Active,
        message: "agent resumed - traffic flowing normally".into(),
    })
    .into_response()
}

async fn list_rules(State(ctx): State<Arc<ApiContext>>, headers: HeaderMap) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    let rules = ctx.engine.rules();
    let total = rules.len();
    Json(RuleListResponse { rules, total }).into_response()
}

async fn create_rule(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Json(req): Json<CreateRuleRequest>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    let pattern = req.pattern.filter(|p| !p.is_empty());
    let domain = req.domain.filter(|d| !d.is_empty());
    if pattern.is_none() && domain.is_none() {
        return error_response(StatusCode::BAD_REQUEST, "pattern or domain is required");
    }

    let rule = Rule {
        id: req
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        pattern,
        domain,
        action: req.action,
        description: req.description.filter(|d| !d.is_empty()),
        tiers: req.tiers,
        enabled: req.enabled.unwrap_or(true),
    };

    let mut rules = ctx.engine.rules();
    if rules.iter().any(|r| r.id == rule.id) {
        return error_response(StatusCode::CONFLICT, "rule id already exists");
    }
    rules.push(rule.clone());
    if let Err(e) = ctx.engine.install(RuleSet { rules }) {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    (
        StatusCode::CREATED,
        Json(CreateRuleResponse {
            rule,
            message: "rule created successfully".into(),
        }),
    )
        .into_response()
}

async fn delete_rule(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    let mut rules = ctx.engine.rules();
    let before = rules.len();
    rules.retain(|r| r.id != id);
    if rules.len() == before {
        return error_response(StatusCode::NOT_FOUND, "rule not found");
    }
    if let Err(e) = ctx.engine.install(RuleSet { rules }) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    Json(DeleteRuleResponse {
        id,
        message: "rule deleted successfully".into(),
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    limit: Option<usize>,
    offset: Option<usize>,
    agent_id: Option<String>,
    action: Option<String>,
}

async fn list_logs(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Query(query): Query<LogQuery>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let offset = query.offset.unwrap_or(0);

    let filtered: Vec<TrafficEntry> = ctx
        .traffic
        .recent(0)
        .into_iter()
        .filter(|entry| {
            query
                .agent_id
                .as_deref()
                .is_none_or(|agent| entry.agent_id.as_deref() == Some(agent))
        })
        .filter(|entry| {
            query
                .action
                .as_deref()
                .is_none_or(|action| entry.action.to_string() == action)
        })
        .collect();

    let total = filtered.len();
    let start = offset.min(total);
    let end = start.saturating_add(limit).min(total);
    Json(LogListResponse {
        logs: filtered[start..end].to_vec(),
        total,
        offset,
        limit,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
struct GrantQuery {
    active: Option<bool>,
}

async fn list_grants(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Query(query): Query<GrantQuery>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    let mut grants = if query.active.unwrap_or(false) {
        ctx.grants.list_active()
    } else {
        ctx.grants.list()
    };
    grants.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    let total = grants.len();
    Json(GrantListResponse { grants, total }).into_response()
}

async fn create_grant(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Json(req): Json<CreateGrantRequest>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    if req.principal.is_empty() || req.target.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "principal and target are required");
    }
    let duration = match humantime::parse_duration(&req.duration) {
        Ok(duration) => duration,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("invalid duration: {e}"))
        }
    };
    let created_by = req.created_by.as_deref().unwrap_or("api");
    let grant = ctx.grants.add(&req.principal, &req.target, created_by, duration);
    tracing::info!(grant = %grant.id, principal = %grant.principal, target = %grant.target, "grant created");
    (
        StatusCode::CREATED,
        Json(CreateGrantResponse {
            grant,
            message: "grant created successfully".into(),
        }),
    )
        .into_response()
}

async fn delete_grant(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    if !ctx.grants.delete(&id) {
        return error_response(StatusCode::NOT_FOUND, "grant not found");
    }
    tracing::info!(grant = %id, "grant revoked");
    Json(DeleteGrantResponse {
        id,
        message: "grant revoked successfully".into(),
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    offset: Option<usize>,
    limit: Option<usize>,
}

async fn list_sessions(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let (sessions, total) = ctx.sessions.list(offset, limit);
    Json(SessionListResponse {
        sessions,
        total,
        offset,
        limit,
    })
    .into_response()
}

async fn exec_check(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Json(req): Json<ExecCheckRequest>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    if req.command.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "command is required");
    }
    let agent_id = req.agent_id.unwrap_or_default();

    // Paused and killed agents are refused before any rule runs.
    let status_block = {
        let mut agents = ctx.agents_mut();
        match agents.get_mut(&agent_id) {
            Some(record) => {
                record.last_seen = Utc::now();
                match record.status {
                    AgentState::Active => None,
                    other => Some(other),
                }
            }
            None => None,
        }
    };
    if let Some(state) = status_block {
        log_exec(&ctx, &agent_id, &req.command, TrafficAction::Block, "agent-status");
        return Json(ExecCheckResponse {
            allowed: false,
            reason: Some(format!("agent is {state}")),
            rule_id: None,
        })
        .into_response();
    }

    let tier = ctx.registry.agent_tier(&agent_id).unwrap_or_default();
    let decision = ctx.engine.check_command(&req.command, &tier);
    let action = if decision.allowed {
        TrafficAction::Allow
    } else {
        TrafficAction::Block
    };
    log_exec(&ctx, &agent_id, &req.command, action, &decision.reason);

    Json(ExecCheckResponse {
        allowed: decision.allowed,
        reason: Some(decision.reason).filter(|r| !r.is_empty()),
        rule_id: decision.rule.map(|r| r.id),
    })
    .into_response()
}

fn log_exec(ctx: &ApiContext, agent_id: &str, command: &str, action: TrafficAction, reason: &str) {
    ctx.traffic.record(TrafficEntry {
        timestamp: Utc::now(),
        source_ip: None,
        agent_id: Some(agent_id.to_string()).filter(|id| !id.is_empty()),
        agent_token: None,
        domain: "exec".into(),
        method: format!("EXEC {command}"),
        action,
        reason: reason.to_string(),
    });
}

#[derive(Debug, Deserialize)]
struct ModeBody {
    mode: String,
}

async fn get_mode(State(ctx): State<Arc<ApiContext>>, headers: HeaderMap) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    Json(serde_json::json!({
        "global_mode": ctx.modes.global_mode(),
        "agent_modes": ctx.modes.all_agent_modes(),
    }))
    .into_response()
}

async fn set_mode(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Json(body): Json<ModeBody>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    let mode: Mode = match body.mode.parse() {
        Ok(mode) => mode,
        Err(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid mode. Use: enforce, audit, lockdown",
            )
        }
    };
    ctx.modes.set_global_mode(mode);
    tracing::info!(%mode, "global mode changed");
    Json(serde_json::json!({ "status": "ok", "mode": mode })).into_response()
}

async fn get_agent_mode(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    Json(serde_json::json!({ "agent": id, "mode": ctx.modes.agent_mode(&id) })).into_response()
}

async fn set_agent_mode(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ModeBody>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    let mode: Mode = match body.mode.parse() {
        Ok(mode) => mode,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid mode"),
    };
    ctx.modes.set_agent_mode(&id, mode);
    tracing::info!(agent = %id, %mode, "agent mode changed");
    Json(serde_json::json!({ "status": "ok", "agent": id, "mode": mode })).into_response()
}

async fn clear_agent_mode(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    ctx.modes.clear_agent_mode(&id);
    Json(serde_json::json!({ "status": "ok", "agent": id, "message": "mode cleared" }))
        .into_response()
}

#[derive(Debug, Deserialize)]
struct TenantQuery {
    tenant: Option<String>,
}

async fn get_fleet_mode(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Query(query): Query<TenantQuery>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    let tenant = query.tenant.unwrap_or_else(|| "default".into());
    let mode = ctx.registry.isolation_mode(&tenant);
    Json(serde_json::json!({ "tenant": tenant, "mode": mode })).into_response()
}

async fn set_fleet_mode(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Query(query): Query<TenantQuery>,
    Json(body): Json<ModeBody>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    let tenant = query.tenant.unwrap_or_else(|| "default".into());
    let mode: FleetMode = match body.mode.parse() {
        Ok(mode) => mode,
        Err(_) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid mode. Use: isolated, fleet")
        }
    };
    ctx.registry.set_isolation_mode(&tenant, mode);
    tracing::info!(%tenant, %mode, "fleet mode changed");
    Json(serde_json::json!({ "status": "ok", "tenant": tenant, "mode": mode })).into_response()
}

async fn fleet_agents(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Query(query): Query<TenantQuery>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    let tenant = query.tenant.unwrap_or_else(|| "default".into());
    // Respects isolation: an isolated tenant's agents are not enumerable.
    let agents = ctx.registry.get_agents(&tenant);
    let mode = ctx.registry.isolation_mode(&tenant);
    Json(serde_json::json!({ "tenant": tenant, "mode": mode, "agents": agents })).into_response()
}

async fn add_fleet_agent(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Query(query): Query<TenantQuery>,
    Json(agent): Json<Agent>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    if agent.id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "agent ID required");
    }
    let tenant = query.tenant.unwrap_or_else(|| "default".into());
    if let Err(e) = ctx.registry.add_agent(&tenant, agent.clone()) {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }
    ctx.register_agent(&agent);
    tracing::info!(agent = %agent.id, %tenant, "agent added");
    Json(serde_json::json!({ "status": "ok", "tenant": tenant, "agent": agent.id }))
        .into_response()
}

#[derive(Debug, Deserialize)]
struct CanCommunicateQuery {
    from: Option<String>,
    to: Option<String>,
}

async fn can_communicate(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Query(query): Query<CanCommunicateQuery>,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e;
    }
    let (Some(from), Some(to)) = (query.from, query.to) else {
        return error_response(StatusCode::BAD_REQUEST, "from and to parameters required");
    };
    let can = ctx.registry.can_communicate(&from, &to);
    Json(serde_json::json!({ "from": from, "to": to, "can_communicate": can })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secre"));
        assert!(constant_time_eq(b"", b""));
    }
}
