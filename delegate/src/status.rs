//! `delegate status`: read-only summary of queues and the agent registry.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::io::queue::QueueStore;
use crate::io::registry::load_agents;
use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEntry {
    pub name: String,
    pub command: String,
    pub executable: String,
    pub source: String,
    pub use_worktree: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub source: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub home: String,
    pub repo: String,
    pub queues: Vec<QueueCount>,
    pub runs: usize,
    pub agents: Vec<AgentEntry>,
    pub skipped_agents: Vec<SkippedEntry>,
}

/// Collect the report. Nothing on disk is modified.
pub fn collect_status(settings: &Settings) -> Result<StatusReport> {
    let paths = &settings.paths;
    let mut queues = Vec::new();
    for (name, dir) in paths.queue_dirs() {
        queues.push(QueueCount {
            name: name.to_string(),
            count: QueueStore::count(dir)?,
        });
    }

    let registry = load_agents(&settings.agent_dirs(), &settings.repo_root);
    let agents = registry
        .agents
        .iter()
        .map(|agent| AgentEntry {
            name: agent.name().to_string(),
            command: agent.command().to_string(),
            executable: agent.executable.display().to_string(),
            source: agent.source.display().to_string(),
            use_worktree: agent.use_worktree(),
        })
        .collect();
    let skipped_agents = registry
        .skipped
        .iter()
        .map(|skipped| SkippedEntry {
            name: skipped.name.clone(),
            source: skipped.source.display().to_string(),
            reason: skipped.reason.to_string(),
        })
        .collect();

    Ok(StatusReport {
        home: paths.home.display().to_string(),
        repo: settings.repo_root.display().to_string(),
        queues,
        runs: count_run_dirs(&paths.runs_dir)?,
        agents,
        skipped_agents,
    })
}

fn count_run_dirs(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut count = 0;
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        if entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
            count += 1;
        }
    }
    Ok(count)
}

impl StatusReport {
    /// Human-readable rendering for the terminal.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "home: {}", self.home);
        let _ = writeln!(out, "repo: {}", self.repo);
        for queue in &self.queues {
            let _ = writeln!(out, "{:<11} {}", format!("{}:", queue.name), queue.count);
        }
        let _ = writeln!(out, "{:<11} {}", "runs:", self.runs);
        if self.agents.is_empty() {
            out.push_str("agents: none eligible\n");
        } else {
            out.push_str("agents:\n");
            for agent in &self.agents {
                let _ = writeln!(
                    out,
                    "  {} -> {} ({})",
                    agent.name, agent.executable, agent.source
                );
            }
        }
        for skipped in &self.skipped_agents {
            let _ = writeln!(
                out,
                "  skipped {}: {}",
                skipped.name.as_deref().unwrap_or(&skipped.source),
                skipped.reason
            );
        }
        out
    }
}
