//! Slugs and time-derived names for run directories, branches, and worktrees.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

const MAX_SLUG_LEN: usize = 48;

static NON_ALNUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug regex"));

/// Lowercase `input`, collapse every run of non-alphanumerics into `-`, and
/// cap the length. Never returns an empty string.
pub fn slugify(input: &str) -> String {
    let lowered = input.to_lowercase();
    let collapsed = NON_ALNUM_RE.replace_all(&lowered, "-");
    let mut slug: String = collapsed.trim_matches('-').chars().take(MAX_SLUG_LEN).collect();
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        return "task".to_string();
    }
    slug
}

/// Compact, lexicographically sortable UTC timestamp with milliseconds.
pub fn compact_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%S%3fZ").to_string()
}

/// RFC 3339 timestamp with millisecond precision, used in records.
pub fn rfc3339_millis(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Run directory name: `<compact-ts>-<task-slug>`.
pub fn run_id(task_id: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}", compact_timestamp(at), slugify(task_id))
}

/// Branch and worktree directory names for one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeNames {
    pub branch: String,
    pub dir_name: String,
}

/// Build collision-resistant names from the agent, task, and a millisecond
/// timestamp: `<prefix><agent>/<task>-<millis>` and `<agent>-<task>-<millis>`.
pub fn worktree_names(
    branch_prefix: &str,
    agent_name: &str,
    task_id: &str,
    at: DateTime<Utc>,
) -> WorktreeNames {
    let agent = slugify(agent_name);
    let task = slugify(task_id);
    let millis = at.timestamp_millis();
    WorktreeNames {
        branch: format!("{branch_prefix}{agent}/{task}-{millis}"),
        dir_name: format!("{agent}-{task}-{millis}"),
    }
}
