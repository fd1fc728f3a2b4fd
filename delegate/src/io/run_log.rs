//! Run ledger: one directory per execution attempt under `<home>/runs/`.
//!
//! Layout of a run directory:
//!
//! - `task.json`: the task as it stood before execution
//! - `prompt.txt`: the literal prompt sent to the agent
//! - `stdout.log`, `stderr.log`: raw captures
//! - `summary.json`: [`RunSummary`], written last
//!
//! Nothing in a run directory is rewritten once `summary.json` exists.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::core::slug::{rfc3339_millis, run_id};
use crate::core::types::RunStatus;
use crate::io::process::CommandOutput;
use crate::task::Task;

const MAX_COLLISION_SUFFIX: u32 = 1_000;

/// Summary record for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub status: RunStatus,
    pub task_id: String,
    /// Attempt number this run represents, starting at 1.
    pub attempt: u32,
    pub max_attempts: u32,
    pub agent: String,
    pub executable: String,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub run_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub stdout_truncated_bytes: usize,
    #[serde(skip_serializing_if = "is_zero")]
    pub stderr_truncated_bytes: usize,
    /// Set when the run failed before or during launch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// Inputs for a [`RunSummary`] that are known before the outcome.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub task_id: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub agent: String,
    pub executable: String,
    pub started_at: DateTime<Utc>,
    pub worktree_path: Option<PathBuf>,
    pub branch: Option<String>,
}

impl RunContext {
    /// Summary of a run whose agent process ran to completion.
    pub fn finished(
        &self,
        run: &RunDir,
        output: &CommandOutput,
        finished_at: DateTime<Utc>,
    ) -> RunSummary {
        let status = if output.exit.success() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        RunSummary {
            exit_code: output.exit.code(),
            signal: output.exit.signal(),
            stdout_truncated_bytes: output.stdout_truncated,
            stderr_truncated_bytes: output.stderr_truncated,
            ..self.summary(run, status, finished_at)
        }
    }

    /// Summary of a run that never produced an exit status.
    pub fn aborted(&self, run: &RunDir, error: &str, finished_at: DateTime<Utc>) -> RunSummary {
        RunSummary {
            error: Some(error.to_string()),
            ..self.summary(run, RunStatus::Failed, finished_at)
        }
    }

    fn summary(&self, run: &RunDir, status: RunStatus, finished_at: DateTime<Utc>) -> RunSummary {
        let duration_ms = (finished_at - self.started_at)
            .num_milliseconds()
            .max(0)
            .unsigned_abs();
        RunSummary {
            status,
            task_id: self.task_id.clone(),
            attempt: self.attempt,
            max_attempts: self.max_attempts,
            agent: self.agent.clone(),
            executable: self.executable.clone(),
            started_at: rfc3339_millis(self.started_at),
            finished_at: rfc3339_millis(finished_at),
            duration_ms,
            exit_code: None,
            signal: None,
            run_dir: run.path.display().to_string(),
            worktree_path: self
                .worktree_path
                .as_ref()
                .map(|p| p.display().to_string()),
            branch: self.branch.clone(),
            stdout_truncated_bytes: 0,
            stderr_truncated_bytes: 0,
            error: None,
        }
    }
}

/// Creates run directories under a runs root.
#[derive(Debug, Clone)]
pub struct RunLedger {
    runs_dir: PathBuf,
}

/// An open run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDir {
    pub id: String,
    pub path: PathBuf,
}

impl RunLedger {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    /// Create a fresh run directory and record the pre-execution inputs.
    ///
    /// The directory name is `<compact-ts>-<task-slug>`, with `-2`, `-3`, ...
    /// appended if a directory of that name already exists.
    pub fn open(&self, task: &Task, prompt: &str, at: DateTime<Utc>) -> Result<RunDir> {
        fs::create_dir_all(&self.runs_dir)
            .with_context(|| format!("create directory {}", self.runs_dir.display()))?;
        let base = run_id(&task.id, at);
        let run = self.create_unique(&base)?;
        write_text(&run.path.join("task.json"), &task.to_json_pretty()?)?;
        write_text(&run.path.join("prompt.txt"), prompt)?;
        debug!(run_id = %run.id, "run directory opened");
        Ok(run)
    }

    fn create_unique(&self, base: &str) -> Result<RunDir> {
        for n in 1..=MAX_COLLISION_SUFFIX {
            let id = if n == 1 {
                base.to_string()
            } else {
                format!("{base}-{n}")
            };
            let path = self.runs_dir.join(&id);
            match fs::create_dir(&path) {
                Ok(()) => return Ok(RunDir { id, path }),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("create run directory {}", path.display()));
                }
            }
        }
        Err(anyhow!("no free run directory name for {base}"))
    }
}

impl RunDir {
    /// Write the raw captures, with a trailing note when bytes were dropped.
    pub fn write_output(&self, output: &CommandOutput) -> Result<()> {
        write_bytes(
            &self.path.join("stdout.log"),
            &output.stdout,
            output.stdout_truncated,
        )?;
        write_bytes(
            &self.path.join("stderr.log"),
            &output.stderr,
            output.stderr_truncated,
        )
    }

    pub fn write_summary(&self, summary: &RunSummary) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(summary).context("serialize run summary")?;
        buf.push('\n');
        write_text(&self.path.join("summary.json"), &buf)
    }
}

fn write_bytes(path: &Path, bytes: &[u8], truncated: usize) -> Result<()> {
    let mut buf = bytes.to_vec();
    if truncated > 0 {
        buf.extend_from_slice(format!("\n[truncated {truncated} bytes]\n").as_bytes());
    }
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ExitOutcome;
    use crate::test_support::task;
    use chrono::TimeZone;
    use serde_json::Value;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().expect("time")
    }

    fn context() -> RunContext {
        RunContext {
            task_id: "t1".to_string(),
            attempt: 1,
            max_attempts: 2,
            agent: "codex".to_string(),
            executable: "/usr/bin/codex".to_string(),
            started_at: at(),
            worktree_path: None,
            branch: None,
        }
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&fs::read_to_string(path).expect("read")).expect("json")
    }

    #[test]
    fn open_writes_inputs_and_names_dir_from_task() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ledger = RunLedger::new(temp.path().join("runs"));

        let run = ledger.open(&task("Fix Bug"), "the prompt", at()).expect("open");

        assert_eq!(run.id, "20260102T030405000Z-fix-bug");
        assert_eq!(
            fs::read_to_string(run.path.join("prompt.txt")).expect("prompt"),
            "the prompt"
        );
        assert_eq!(read_json(&run.path.join("task.json"))["id"], "Fix Bug");
    }

    #[test]
    fn colliding_run_ids_get_suffixes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ledger = RunLedger::new(temp.path());
        let t = task("t1");

        let first = ledger.open(&t, "p", at()).expect("first");
        let second = ledger.open(&t, "p", at()).expect("second");
        let third = ledger.open(&t, "p", at()).expect("third");

        assert_ne!(first.path, second.path);
        assert!(second.id.ends_with("-2"));
        assert!(third.id.ends_with("-3"));
    }

    #[test]
    fn finished_summary_records_exit_and_truncation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run = RunLedger::new(temp.path()).open(&task("t1"), "p", at()).expect("open");
        let output = CommandOutput {
            exit: ExitOutcome::Code(0),
            stdout: b"hi\n".to_vec(),
            stderr: Vec::new(),
            stdout_truncated: 7,
            stderr_truncated: 0,
        };

        run.write_output(&output).expect("output");
        let summary = context().finished(&run, &output, at() + chrono::Duration::milliseconds(1500));
        run.write_summary(&summary).expect("summary");

        let json = read_json(&run.path.join("summary.json"));
        assert_eq!(json["status"], "completed");
        assert_eq!(json["exitCode"], 0);
        assert_eq!(json["signal"], Value::Null);
        assert_eq!(json["durationMs"], 1500);
        assert_eq!(json["attempt"], 1);
        assert_eq!(json["stdoutTruncatedBytes"], 7);
        assert!(json.get("stderrTruncatedBytes").is_none());
        assert!(json.get("worktreePath").is_none());
        let stdout = fs::read_to_string(run.path.join("stdout.log")).expect("stdout");
        assert!(stdout.starts_with("hi\n"));
        assert!(stdout.contains("[truncated 7 bytes]"));
    }

    #[test]
    fn aborted_summary_is_failed_with_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run = RunLedger::new(temp.path()).open(&task("t1"), "p", at()).expect("open");
        let mut ctx = context();
        ctx.branch = Some("delegate/codex/t1-1".to_string());

        let summary = ctx.aborted(&run, "git worktree add failed: boom", at());

        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.exit_code, None);
        assert_eq!(summary.error.as_deref(), Some("git worktree add failed: boom"));
        assert_eq!(summary.branch.as_deref(), Some("delegate/codex/t1-1"));
    }
}
