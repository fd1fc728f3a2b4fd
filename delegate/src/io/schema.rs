//! Embedded JSON Schemas for task and agent files.

use anyhow::{Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;

pub const TASK_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/task.schema.json"
));

pub const AGENT_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/agent.schema.json"
));

/// Validate `instance` against an embedded schema, joining every violation
/// into one error message.
pub fn validate_schema(schema_src: &str, instance: &Value) -> Result<()> {
    let schema: Value =
        serde_json::from_str(schema_src).map_err(|err| anyhow!("invalid schema json: {err}"))?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(instance) {
        let messages = compiled
            .iter_errors(instance)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!("schema validation failed: {}", messages.join("; ")));
    }
    Ok(())
}
