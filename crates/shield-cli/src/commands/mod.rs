pub mod access;
pub mod agent;
pub mod logs;
pub mod mode;
pub mod rules;
pub mod status;

/// Pretty-print a value as indented JSON for `--json` output.
pub fn output_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
