//! Task records as stored in the queue directories.
//!
//! A task file is validated in three passes: it must be JSON, it must carry a
//! non-blank `prompt`, and it must conform to the embedded task schema. Each
//! pass maps to its own [`TaskRejection`] so the failure reason recorded for a
//! rejected task is precise.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::types::FailureReason;
use crate::io::schema::{TASK_SCHEMA, validate_schema};

/// A validated task, normalized to its documented defaults.
///
/// Unknown keys from the source file are kept in `extra` so rewriting a task
/// (retry bookkeeping) never drops submitter-provided data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command_args: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    pub max_attempts: u32,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tried_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Raw task document, mirroring the on-disk shape with every field optional.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskDocument {
    id: Option<String>,
    title: Option<String>,
    prompt: Option<String>,
    agent: Option<String>,
    tool: Option<String>,
    cwd: Option<String>,
    command_args: Option<Vec<String>>,
    env: Option<BTreeMap<String, String>>,
    max_attempts: Option<u32>,
    attempt: Option<u32>,
    last_error: Option<String>,
    last_tried_at: Option<String>,
    created_at: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Why a task payload was refused before any execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRejection {
    /// The file is not valid JSON.
    InvalidJson(String),
    /// `prompt` is absent, not a string, or blank.
    MissingPrompt,
    /// The payload is JSON with a prompt but violates the task schema.
    InvalidTask(String),
}

impl TaskRejection {
    pub fn reason(&self) -> FailureReason {
        match self {
            TaskRejection::InvalidJson(_) => FailureReason::InvalidJson,
            TaskRejection::MissingPrompt => FailureReason::MissingPrompt,
            TaskRejection::InvalidTask(_) => FailureReason::InvalidTask,
        }
    }

    /// Diagnostic text for the event log, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            TaskRejection::InvalidJson(msg) | TaskRejection::InvalidTask(msg) => Some(msg),
            TaskRejection::MissingPrompt => None,
        }
    }
}

impl Task {
    /// Parse and validate a task file.
    ///
    /// `fallback_id` is used when the file carries no `id` (normally the file
    /// stem). `default_max_attempts` fills in a missing `maxAttempts`.
    pub fn parse(
        raw: &str,
        fallback_id: &str,
        default_max_attempts: u32,
    ) -> std::result::Result<Task, TaskRejection> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| TaskRejection::InvalidJson(err.to_string()))?;
        if !has_prompt(&value) {
            return Err(TaskRejection::MissingPrompt);
        }
        validate_schema(TASK_SCHEMA, &value)
            .map_err(|err| TaskRejection::InvalidTask(err.to_string()))?;
        let doc: TaskDocument = serde_json::from_value(value)
            .map_err(|err| TaskRejection::InvalidTask(err.to_string()))?;

        let id = doc
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| fallback_id.to_string());
        let title = doc
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| id.clone());
        Ok(Task {
            title,
            prompt: doc.prompt.unwrap_or_default(),
            agent: non_blank(doc.agent),
            tool: non_blank(doc.tool),
            cwd: non_blank(doc.cwd),
            command_args: doc.command_args.unwrap_or_default(),
            env: doc.env.unwrap_or_default(),
            max_attempts: doc.max_attempts.unwrap_or(default_max_attempts).max(1),
            attempt: doc.attempt.unwrap_or(0),
            last_error: doc.last_error,
            last_tried_at: doc.last_tried_at,
            created_at: doc.created_at,
            extra: doc.extra,
            id,
        })
    }

    /// Serialize to the pretty JSON form used for task files (trailing newline).
    pub fn to_json_pretty(&self) -> Result<String> {
        let mut buf = serde_json::to_string_pretty(self).context("serialize task")?;
        buf.push('\n');
        Ok(buf)
    }
}

fn has_prompt(value: &Value) -> bool {
    value
        .get("prompt")
        .and_then(Value::as_str)
        .is_some_and(|prompt| !prompt.trim().is_empty())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fills_documented_defaults() {
        let task = Task::parse(r#"{"prompt":"echo hi"}"#, "stem", 2).expect("parse");
        assert_eq!(task.id, "stem");
        assert_eq!(task.title, "stem");
        assert_eq!(task.max_attempts, 2);
        assert_eq!(task.attempt, 0);
        assert!(task.command_args.is_empty());
        assert!(task.env.is_empty());
    }

    #[test]
    fn parse_rejects_malformed_json() {
        let err = Task::parse("{not json", "stem", 2).unwrap_err();
        assert!(matches!(err, TaskRejection::InvalidJson(_)));
        assert_eq!(err.reason(), FailureReason::InvalidJson);
    }

    #[test]
    fn parse_rejects_blank_or_missing_prompt() {
        for raw in [r#"{"title":"t"}"#, r#"{"prompt":"   "}"#, r#"{"prompt":3}"#] {
            let err = Task::parse(raw, "stem", 2).unwrap_err();
            assert_eq!(err, TaskRejection::MissingPrompt, "input: {raw}");
        }
    }

    #[test]
    fn parse_rejects_schema_violations() {
        let err = Task::parse(r#"{"prompt":"p","maxAttempts":0}"#, "stem", 2).unwrap_err();
        assert!(matches!(err, TaskRejection::InvalidTask(_)));

        let err = Task::parse(r#"{"prompt":"p","env":{"A":1}}"#, "stem", 2).unwrap_err();
        assert_eq!(err.reason(), FailureReason::InvalidTask);
    }

    #[test]
    fn rewrite_preserves_unknown_fields() {
        let raw = r#"{"id":"a","prompt":"p","priority":"high","attempt":1,"maxAttempts":3}"#;
        let task = Task::parse(raw, "stem", 2).expect("parse");
        let json = task.to_json_pretty().expect("serialize");
        let reparsed: Value = serde_json::from_str(&json).expect("json");
        assert_eq!(reparsed["priority"], "high");
        assert_eq!(reparsed["attempt"], 1);
        assert_eq!(reparsed["maxAttempts"], 3);
    }
}
