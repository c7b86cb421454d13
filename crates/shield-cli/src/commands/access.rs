use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client::ApiClient;
use crate::commands::output_json;

#[derive(Debug, Serialize, Deserialize)]
struct Grant {
    id: String,
    principal: String,
    target: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    created_by: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GrantListResponse {
    grants: Vec<Grant>,
    total: usize,
}

pub fn grant(
    client: &ApiClient,
    target: &str,
    duration: &str,
    principal: &str,
    json: bool,
) -> anyhow::Result<()> {
    let response: serde_json::Value = client.post(
        "/grants",
        &json!({
            "target": target,
            "duration": duration,
            "principal": principal,
            "created_by": "cli",
        }),
    )?;
    if json {
        return output_json(&response);
    }
    let grant = &response["grant"];
    println!("Grant created: {}", grant["id"].as_str().unwrap_or("?"));
    println!("  Target: {}", grant["target"].as_str().unwrap_or("?"));
    println!("  Principal: {}", grant["principal"].as_str().unwrap_or("?"));
    println!("  Expires: {}", grant["expires_at"].as_str().unwrap_or("?"));
    Ok(())
}

pub fn list(client: &ApiClient, active: bool, json: bool) -> anyhow::Result<()> {
    let path = if active { "/grants?active=true" } else { "/grants" };
    let response: GrantListResponse = client.get(path)?;
    if json {
        return output_json(&response);
    }
    if response.total == 0 {
        println!("No active grants");
        return Ok(());
    }
    println!("Grants ({} total):", response.total);
    let now = Utc::now();
    for grant in &response.grants {
        let remaining = grant.expires_at - now;
        let status = if remaining > chrono::TimeDelta::zero() { "+" } else { "x" };
        // Round to whole seconds for display.
        let remaining = std::time::Duration::from_secs(remaining.num_seconds().max(0) as u64);
        println!(
            "{} {:<28} {} -> {:<20} (expires in {})",
            status,
            grant.id,
            grant.principal,
            grant.target,
            humantime::format_duration(remaining),
        );
    }
    Ok(())
}

pub fn revoke(client: &ApiClient, grant_id: &str, json: bool) -> anyhow::Result<()> {
    let response: serde_json::Value = client.delete(&format!("/grants/{grant_id}"))?;
    if json {
        return output_json(&response);
    }
    println!("{}", response["message"].as_str().unwrap_or("grant revoked"));
    Ok(())
}
