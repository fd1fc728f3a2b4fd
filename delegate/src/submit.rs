//! `delegate submit`: write a new task file into `inbox/`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde_json::Map;
use tracing::info;

use crate::core::slug::{compact_timestamp, rfc3339_millis, slugify};
use crate::io::init::HomePaths;
use crate::io::queue::QueueStore;
use crate::task::Task;

/// Caller-supplied fields of a new task.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub prompt: String,
    pub title: Option<String>,
    pub id: Option<String>,
    pub agent: Option<String>,
    pub tool: Option<String>,
    pub cwd: Option<String>,
    pub max_attempts: Option<u32>,
    pub env: BTreeMap<String, String>,
    pub command_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub id: String,
    pub path: PathBuf,
}

/// Build and enqueue a task. The file name is `<compact-ts>-<id-slug>.json`
/// so lexicographic order follows submission order.
pub fn submit_task(
    paths: &HomePaths,
    request: SubmitRequest,
    default_max_attempts: u32,
    at: DateTime<Utc>,
) -> Result<Submitted> {
    if request.prompt.trim().is_empty() {
        bail!("prompt must not be empty");
    }
    let max_attempts = request.max_attempts.unwrap_or(default_max_attempts);
    if max_attempts == 0 {
        bail!("--max-attempts must be > 0");
    }

    let title = non_blank(request.title).unwrap_or_else(|| summarize(&request.prompt));
    let id = non_blank(request.id)
        .unwrap_or_else(|| format!("{}-{}", slugify(&title), at.timestamp_millis()));
    let task = Task {
        id: id.clone(),
        title,
        prompt: request.prompt,
        agent: non_blank(request.agent),
        tool: non_blank(request.tool),
        cwd: non_blank(request.cwd),
        command_args: request.command_args,
        env: request.env,
        max_attempts,
        attempt: 0,
        last_error: None,
        last_tried_at: None,
        created_at: Some(rfc3339_millis(at)),
        extra: Map::new(),
    };

    let file_name = format!("{}-{}.json", compact_timestamp(at), slugify(&id));
    let path = QueueStore::new(paths).enqueue(&file_name, &task.to_json_pretty()?)?;
    info!(task_id = %id, path = %path.display(), "task submitted");
    Ok(Submitted { id, path })
}

/// Parse `KEY=VALUE` pairs into an environment map.
pub fn parse_env_pairs(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid --env '{pair}' (expected KEY=VALUE)"))?;
        if key.is_empty() {
            bail!("invalid --env '{pair}' (empty key)");
        }
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}

/// First line of the prompt, shortened for use as a title.
fn summarize(prompt: &str) -> String {
    let line = prompt.trim().lines().next().unwrap_or_default().trim();
    let mut title: String = line.chars().take(80).collect();
    if line.chars().count() > 80 {
        title.push_str("...");
    }
    title
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestHome;
    use chrono::TimeZone;
    use std::fs;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 6, 7, 8, 9).single().expect("time")
    }

    #[test]
    fn submitted_file_parses_back_as_the_same_task() {
        let home = TestHome::new();
        let request = SubmitRequest {
            prompt: "fix the parser\nplease".to_string(),
            agent: Some("codex".to_string()),
            env: BTreeMap::from([("A".to_string(), "1".to_string())]),
            command_args: vec!["--x".to_string()],
            ..SubmitRequest::default()
        };

        let submitted = submit_task(&home.settings.paths, request, 2, at()).expect("submit");

        assert_eq!(submitted.id, "fix-the-parser-1778051289000");
        assert_eq!(
            submitted.path,
            home.settings
                .paths
                .inbox_dir
                .join("20260506T070809000Z-fix-the-parser-1778051289000.json")
        );
        let raw = fs::read_to_string(&submitted.path).expect("read");
        let task = Task::parse(&raw, "fallback", 9).expect("parse");
        assert_eq!(task.id, submitted.id);
        assert_eq!(task.title, "fix the parser");
        assert_eq!(task.max_attempts, 2);
        assert_eq!(task.attempt, 0);
        assert_eq!(task.agent.as_deref(), Some("codex"));
        assert_eq!(task.created_at.as_deref(), Some("2026-05-06T07:08:09.000Z"));
    }

    #[test]
    fn explicit_id_names_the_file() {
        let home = TestHome::new();
        let request = SubmitRequest {
            prompt: "p".to_string(),
            id: Some("My Task".to_string()),
            max_attempts: Some(1),
            ..SubmitRequest::default()
        };

        let submitted = submit_task(&home.settings.paths, request, 2, at()).expect("submit");

        assert_eq!(submitted.id, "My Task");
        assert!(submitted.path.ends_with("20260506T070809000Z-my-task.json"));
    }

    #[test]
    fn blank_prompt_and_zero_attempts_are_refused() {
        let home = TestHome::new();
        let blank = SubmitRequest {
            prompt: "  ".to_string(),
            ..SubmitRequest::default()
        };
        assert!(submit_task(&home.settings.paths, blank, 2, at()).is_err());

        let zero = SubmitRequest {
            prompt: "p".to_string(),
            max_attempts: Some(0),
            ..SubmitRequest::default()
        };
        assert!(submit_task(&home.settings.paths, zero, 2, at()).is_err());
        assert_eq!(home.count(&home.settings.paths.inbox_dir), 0);
    }

    #[test]
    fn env_pairs_split_on_first_equals() {
        let env = parse_env_pairs(&["A=1".to_string(), "B=x=y".to_string()]).expect("parse");
        assert_eq!(env.get("B").map(String::as_str), Some("x=y"));
        assert!(parse_env_pairs(&["novalue".to_string()]).is_err());
        assert!(parse_env_pairs(&["=v".to_string()]).is_err());
    }
}
