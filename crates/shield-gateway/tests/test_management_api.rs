//! Management plane tests: the endpoints drive the live components.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use shield_api::{router, ApiContext};
use shield_bastion::{GrantStore, SessionLogStore};
use shield_fleet::FleetRegistry;
use shield_mode::ModeManager;
use shield_proxy::TrafficLog;
use shield_rules::RuleEngine;
use shield_types::Mode;

use common::agent;

async fn spawn_api(rules_yaml: &str, token: Option<&str>) -> (SocketAddr, Arc<ApiContext>) {
    let engine = Arc::new(RuleEngine::new());
    if !rules_yaml.is_empty() {
        engine
            .load_from_bytes(rules_yaml.as_bytes())
            .expect("load rules");
    }
    let ctx = Arc::new(ApiContext::new(
        engine,
        Arc::new(ModeManager::new()),
        Arc::new(FleetRegistry::new()),
        Arc::new(TrafficLog::new(100)),
        Arc::new(GrantStore::new(None)),
        Arc::new(SessionLogStore::new(100)),
        "test",
        token.map(String::from),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind api");
    let addr = listener.local_addr().expect("api addr");
    let app = router(Arc::clone(&ctx));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, ctx)
}

#[tokio::test]
async fn health_needs_no_auth() {
    let (addr, _ctx) = spawn_api("", Some("sekret")).await;
    let response = reqwest::get(format!("http://{addr}/health")).await.expect("request");
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.expect("body"), "OK");
}

#[tokio::test]
async fn management_token_is_enforced() {
    let (addr, _ctx) = spawn_api("", Some("sekret")).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{addr}/status"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 401);

    let response = client
        .get(format!("http://{addr}/status"))
        .bearer_auth("wrong")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 403);

    let response = client
        .get(format!("http://{addr}/status"))
        .bearer_auth("sekret")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 200);

    // exec/check gates live command execution; it is part of the guarded
    // plane like everything else.
    let response = client
        .post(format!("http://{addr}/exec/check"))
        .json(&serde_json::json!({"command": "ls"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 401);

    let response = client
        .post(format!("http://{addr}/exec/check"))
        .bearer_auth("sekret")
        .json(&serde_json::json!({"command": "ls"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn status_reports_rule_count() {
    let rules = "rules:\n  - id: r1\n    domain: evil.com\n    action: block\n";
    let (addr, _ctx) = spawn_api(rules, None).await;

    let body: serde_json::Value = reqwest::get(format!("http://{addr}/status"))
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body["status"], "operational");
    assert_eq!(body["rule_count"], 1);
    assert_eq!(body["version"], "test");
}

#[tokio::test]
async fn rule_crud_drives_the_live_engine() {
    let (addr, ctx) = spawn_api("", None).await;
    let client = reqwest::Client::new();

    assert!(ctx.engine.check_domain("blocked.example", "crew").allowed);

    let response = client
        .post(format!("http://{addr}/rules"))
        .json(&serde_json::json!({
            "id": "api-rule",
            "domain": "blocked.example",
            "action": "block",
            "description": "added over the api",
        }))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 201);

    // The new rule is live immediately.
    assert!(!ctx.engine.check_domain("blocked.example", "crew").allowed);

    let body: serde_json::Value = client
        .get(format!("http://{addr}/rules"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body["total"], 1);

    // Duplicate ids are refused.
    let response = client
        .post(format!("http://{addr}/rules"))
        .json(&serde_json::json!({"id": "api-rule", "domain": "x.com", "action": "block"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 409);

    // A rule needs a pattern or a domain.
    let response = client
        .post(format!("http://{addr}/rules"))
        .json(&serde_json::json!({"action": "block"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 400);

    let response = client
        .delete(format!("http://{addr}/rules/api-rule"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 200);
    assert!(ctx.engine.check_domain("blocked.example", "crew").allowed);

    let response = client
        .delete(format!("http://{addr}/rules/api-rule"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn grant_lifecycle_over_the_api() {
    let (addr, ctx) = spawn_api("", None).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/grants"))
        .json(&serde_json::json!({
            "principal": "alice",
            "target": "agent-1",
            "duration": "30m",
            "created_by": "cli",
        }))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 201);
    let body: serde_json::Value = response.json().await.expect("json");
    let grant_id = body["grant"]["id"].as_str().expect("grant id").to_string();

    assert!(ctx.grants.validate_access("alice", "agent-1").is_some());

    let body: serde_json::Value = client
        .get(format!("http://{addr}/grants?active=true"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body["total"], 1);

    let response = client
        .delete(format!("http://{addr}/grants/{grant_id}"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 200);
    assert!(ctx.grants.validate_access("alice", "agent-1").is_none());

    let response = client
        .post(format!("http://{addr}/grants"))
        .json(&serde_json::json!({
            "principal": "alice",
            "target": "agent-1",
            "duration": "not-a-duration",
        }))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn exec_check_applies_rules_and_agent_status() {
    let rules = r#"
rules:
  - id: block-rm
    pattern: "rm -rf *"
    action: block
    description: "recursive delete"
"#;
    let (addr, ctx) = spawn_api(rules, None).await;
    ctx.register_agent(&agent("sarai", None, None, None));
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .post(format!("http://{addr}/exec/check"))
        .json(&serde_json::json!({"command": "rm -rf /", "agent_id": "sarai"}))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body["allowed"], false);
    assert_eq!(body["rule_id"], "block-rm");

    let body: serde_json::Value = client
        .post(format!("http://{addr}/exec/check"))
        .json(&serde_json::json!({"command": "ls -la", "agent_id": "sarai"}))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body["allowed"], true);

    // A paused agent is refused before rules run, and the pause installs a
    // lockdown override on the data path.
    let response = client
        .post(format!("http://{addr}/agents/sarai/pause"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 200);
    assert_eq!(ctx.modes.agent_mode("sarai"), Mode::Lockdown);

    let body: serde_json::Value = client
        .post(format!("http://{addr}/exec/check"))
        .json(&serde_json::json!({"command": "ls -la", "agent_id": "sarai"}))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body["allowed"], false);
    assert!(body["reason"].as_str().unwrap_or_default().contains("paused"));

    // Resume clears the override; killed agents cannot be resumed.
    let response = client
        .post(format!("http://{addr}/agents/sarai/resume"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 200);
    assert_eq!(ctx.modes.agent_mode("sarai"), Mode::Enforce);

    let response = client
        .post(format!("http://{addr}/agents/sarai/kill"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 200);
    let response = client
        .post(format!("http://{addr}/agents/sarai/resume"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn mode_endpoints_roundtrip() {
    let (addr, ctx) = spawn_api("", None).await;
    let client = reqwest::Client::new();

    let response = client
        .put(format!("http://{addr}/mode"))
        .json(&serde_json::json!({"mode": "audit"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 200);
    assert_eq!(ctx.modes.global_mode(), Mode::Audit);

    let body: serde_json::Value = client
        .get(format!("http://{addr}/mode"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body["global_mode"], "audit");

    let response = client
        .put(format!("http://{addr}/mode"))
        .json(&serde_json::json!({"mode": "paranoid"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 400);

    // Per-agent override lifecycle.
    let response = client
        .put(format!("http://{addr}/agent/sarai/mode"))
        .json(&serde_json::json!({"mode": "lockdown"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 200);
    assert_eq!(ctx.modes.agent_mode("sarai"), Mode::Lockdown);

    let response = client
        .delete(format!("http://{addr}/agent/sarai/mode"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 200);
    assert_eq!(ctx.modes.agent_mode("sarai"), Mode::Audit);
}

#[tokio::test]
async fn fleet_endpoints_respect_isolation() {
    let (addr, ctx) = spawn_api("", None).await;
    let client = reqwest::Client::new();

    ctx.registry
        .add_agent("acme", agent("a1", None, None, None))
        .expect("add a1");
    ctx.registry
        .add_agent("acme", agent("a2", None, None, None))
        .expect("add a2");

    // Isolated: agents are not enumerable.
    let body: serde_json::Value = client
        .get(format!("http://{addr}/fleet/agents?tenant=acme"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body["agents"].as_array().expect("agents").len(), 0);

    let body: serde_json::Value = client
        .get(format!("http://{addr}/fleet/can-communicate?from=a1&to=a2"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body["can_communicate"], false);

    let response = client
        .put(format!("http://{addr}/fleet/mode?tenant=acme"))
        .json(&serde_json::json!({"mode": "fleet"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = client
        .get(format!("http://{addr}/fleet/agents?tenant=acme"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body["agents"].as_array().expect("agents").len(), 2);

    let body: serde_json::Value = client
        .get(format!("http://{addr}/fleet/can-communicate?from=a1&to=a2"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body["can_communicate"], true);
}

#[tokio::test]
async fn logs_endpoint_paginates_and_filters() {
    let (addr, ctx) = spawn_api("", None).await;
    let client = reqwest::Client::new();

    for i in 0..5 {
        ctx.traffic.record(shield_types::TrafficEntry {
            timestamp: chrono::Utc::now(),
            source_ip: None,
            agent_id: Some(if i % 2 == 0 { "even" } else { "odd" }.to_string()),
            agent_token: None,
            domain: format!("d{i}.com"),
            method: "GET".into(),
            action: if i == 4 {
                shield_types::TrafficAction::Block
            } else {
                shield_types::TrafficAction::Allow
            },
            reason: String::new(),
        });
    }

    let body: serde_json::Value = client
        .get(format!("http://{addr}/logs?limit=2"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body["total"], 5);
    assert_eq!(body["logs"].as_array().expect("logs").len(), 2);
    // Newest first.
    assert_eq!(body["logs"][0]["domain"], "d4.com");

    let body: serde_json::Value = client
        .get(format!("http://{addr}/logs?agent_id=even"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body["total"], 3);

    let body: serde_json::Value = client
        .get(format!("http://{addr}/logs?action=block"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body["total"], 1);
}
