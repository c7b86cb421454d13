use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::ApiClient;
use crate::commands::output_json;

#[derive(Debug, Serialize, Deserialize)]
struct StatusResponse {
    status: String,
    version: String,
    uptime: String,
    started_at: DateTime<Utc>,
    agent_count: usize,
    rule_count: usize,
    requests_total: u64,
    blocked_total: u64,
}

pub fn run(client: &ApiClient, json: bool) -> anyhow::Result<()> {
    let status: StatusResponse = client.get("/status")?;
    if json {
        return output_json(&status);
    }
    println!("Shield Status: {}", status.status);
    println!("Version: {}", status.version);
    println!("Uptime: {}", status.uptime);
    println!("Agents: {}", status.agent_count);
    println!("Rules: {}", status.rule_count);
    println!("Total Requests: {}", status.requests_total);
    println!("Total Blocked: {}", status.blocked_total);
    Ok(())
}
