use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::ApiClient;
use crate::commands::output_json;

#[derive(Debug, Serialize, Deserialize)]
struct LogEntry {
    timestamp: DateTime<Utc>,
    #[serde(default)]
    source_ip: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
    domain: String,
    method: String,
    action: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LogListResponse {
    logs: Vec<LogEntry>,
    total: usize,
    offset: usize,
    limit: usize,
}

pub fn run(
    client: &ApiClient,
    limit: usize,
    offset: usize,
    agent: Option<String>,
    action: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let mut query = format!("/logs?limit={limit}&offset={offset}");
    if let Some(agent) = &agent {
        query.push_str(&format!("&agent_id={agent}"));
    }
    if let Some(action) = &action {
        query.push_str(&format!("&action={action}"));
    }

    let response: LogListResponse = client.get(&query)?;
    if json {
        return output_json(&response);
    }
    if response.logs.is_empty() {
        println!("No logs found");
        return Ok(());
    }
    println!("Logs (showing {} of {}):", response.logs.len(), response.total);
    for entry in &response.logs {
        let marker = match entry.action.as_str() {
            "allow" => "+",
            "audit" => "~",
            _ => "x",
        };
        let mut target = entry.domain.clone();
        if target.len() > 50 {
            target.truncate(47);
            target.push_str("...");
        }
        println!(
            "{} {} {:<10} {:<6} {:<8} {}",
            marker,
            entry.timestamp.format("%H:%M:%S"),
            entry.agent_id.as_deref().unwrap_or("-"),
            entry.method,
            entry.action,
            target,
        );
        if !entry.reason.is_empty() {
            println!("      {}", entry.reason);
        }
    }
    Ok(())
}
