use anyhow::bail;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client::ApiClient;
use crate::commands::output_json;

#[derive(Debug, Serialize, Deserialize)]
struct Rule {
    id: String,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    domain: Option<String>,
    action: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tiers: Vec<String>,
    enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct RuleListResponse {
    rules: Vec<Rule>,
    total: usize,
}

pub fn list(client: &ApiClient, json: bool) -> anyhow::Result<()> {
    let response: RuleListResponse = client.get("/rules")?;
    if json {
        return output_json(&response);
    }
    if response.total == 0 {
        println!("No rules configured");
        return Ok(());
    }
    println!("Rules ({} total):", response.total);
    for rule in &response.rules {
        let marker = if rule.enabled { "+" } else { "o" };
        let target = rule
            .pattern
            .as_deref()
            .or(rule.domain.as_deref())
            .unwrap_or("-");
        println!("{} [{}] {:<6} {}", marker, rule.id, rule.action, target);
        if let Some(desc) = rule.description.as_deref() {
            println!("      {desc}");
        }
        if !rule.tiers.is_empty() {
            println!("      tiers: {}", rule.tiers.join(", "));
        }
    }
    Ok(())
}

pub fn add(
    client: &ApiClient,
    pattern: Option<String>,
    domain: Option<String>,
    action: &str,
    description: Option<String>,
    tiers: Vec<String>,
    json: bool,
) -> anyhow::Result<()> {
    if pattern.is_none() && domain.is_none() {
        bail!("either --pattern or --domain is required");
    }
    if !matches!(action, "block" | "allow") {
        bail!("action must be block or allow");
    }
    let response: serde_json::Value = client.post(
        "/rules",
        &json!({
            "pattern": pattern,
            "domain": domain,
            "action": action,
            "description": description,
            "tiers": tiers,
            "enabled": true,
        }),
    )?;
    if json {
        return output_json(&response);
    }
    let rule = &response["rule"];
    println!("Rule created: {}", rule["id"].as_str().unwrap_or("?"));
    println!("  Action: {}", rule["action"].as_str().unwrap_or("?"));
    let target = rule["pattern"].as_str().or(rule["domain"].as_str());
    println!("  Target: {}", target.unwrap_or("-"));
    Ok(())
}

pub fn remove(client: &ApiClient, rule_id: &str, json: bool) -> anyhow::Result<()> {
    let response: serde_json::Value = client.delete(&format!("/rules/{rule_id}"))?;
    if json {
        return output_json(&response);
    }
    println!("{}", response["message"].as_str().unwrap_or("rule deleted"));
    Ok(())
}
