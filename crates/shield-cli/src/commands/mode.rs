use anyhow::bail;
use serde_json::json;

use crate::client::ApiClient;
use crate::commands::output_json;

pub fn run(client: &ApiClient, mode: &str, json: bool) -> anyhow::Result<()> {
    if !matches!(mode, "enforce" | "audit" | "lockdown") {
        bail!("unknown mode: {mode} (use enforce, audit, or lockdown)");
    }
    let response: serde_json::Value = client.put("/mode", &json!({ "mode": mode }))?;
    if json {
        return output_json(&response);
    }
    println!("Global mode set to: {mode}");
    Ok(())
}
