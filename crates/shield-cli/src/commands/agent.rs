use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::ApiClient;
use crate::commands::output_json;

#[derive(Debug, Serialize, Deserialize)]
struct AgentRecord {
    id: String,
    name: String,
    #[serde(default)]
    ip: Option<String>,
    status: String,
    last_seen: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AgentListResponse {
    agents: Vec<AgentRecord>,
    total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct AgentActionResponse {
    id: String,
    status: String,
    message: String,
}

pub fn list(client: &ApiClient, json: bool) -> anyhow::Result<()> {
    let response: AgentListResponse = client.get("/agents")?;
    if json {
        return output_json(&response);
    }
    if response.total == 0 {
        println!("No agents registered");
        return Ok(());
    }
    println!("Agents ({} total):", response.total);
    for agent in &response.agents {
        let marker = match agent.status.as_str() {
            "active" => "+",
            "paused" => "=",
            "killed" => "x",
            _ => "?",
        };
        println!(
            "{} {:<12} {:<15} {:<8} (last seen: {})",
            marker,
            agent.name,
            agent.ip.as_deref().unwrap_or("-"),
            agent.status,
            agent.last_seen.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

fn action(client: &ApiClient, agent_id: &str, verb: &str, json: bool) -> anyhow::Result<()> {
    let response: AgentActionResponse =
        client.post(&format!("/agents/{agent_id}/{verb}"), &serde_json::json!({}))?;
    if json {
        return output_json(&response);
    }
    println!("{}", response.message);
    Ok(())
}

pub fn pause(client: &ApiClient, agent_id: &str, json: bool) -> anyhow::Result<()> {
    action(client, agent_id, "pause", json)
}

pub fn kill(client: &ApiClient, agent_id: &str, json: bool) -> anyhow::Result<()> {
    action(client, agent_id, "kill", json)
}

pub fn resume(client: &ApiClient, agent_id: &str, json: bool) -> anyhow::Result<()> {
    action(client, agent_id, "resume", json)
}
