//! Agent invocation.
//!
//! [`build_request`] turns an agent and a task into a concrete process
//! invocation; the [`AgentRunner`] trait decouples step orchestration from
//! actually spawning it. Tests use scripted runners that return predetermined
//! outputs without spawning processes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::agent::{Agent, PromptMode};
use crate::io::process::{CommandOutput, OUTPUT_LIMIT_BYTES, run_command};
use crate::task::Task;

/// A fully resolved agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Executable resolved during registry load.
    pub program: PathBuf,
    /// `defaultArgs`, then `commandArgs`, then the prompt in argument mode.
    pub args: Vec<String>,
    /// Prompt text for stdin mode.
    pub stdin: Option<String>,
    /// Overrides applied on top of the inherited environment, task over agent.
    pub env: BTreeMap<String, String>,
    pub workdir: PathBuf,
    pub output_limit_bytes: usize,
}

/// Build the invocation for `task` on `agent`, running in `workdir`.
pub fn build_request(agent: &Agent, task: &Task, prompt: &str, workdir: PathBuf) -> ExecRequest {
    let mut args = agent.definition.default_args.clone();
    args.extend(task.command_args.iter().cloned());

    let stdin = match agent.prompt_mode() {
        PromptMode::Argument => {
            args.push(prompt.to_string());
            None
        }
        PromptMode::Stdin => Some(prompt.to_string()),
    };

    let mut env = agent.definition.env.clone();
    env.extend(task.env.iter().map(|(k, v)| (k.clone(), v.clone())));

    ExecRequest {
        program: agent.executable.clone(),
        args,
        stdin,
        env,
        workdir,
        output_limit_bytes: OUTPUT_LIMIT_BYTES,
    }
}

/// Directory the agent runs in: the task's `cwd` under `base`, or `base`.
///
/// An absolute `cwd` replaces `base` entirely.
pub fn resolve_workdir(base: &Path, cwd: Option<&str>) -> PathBuf {
    match cwd.map(str::trim).filter(|c| !c.is_empty()) {
        Some(cwd) => base.join(cwd),
        None => base.to_path_buf(),
    }
}

/// Abstraction over agent execution backends.
pub trait AgentRunner {
    /// Run the agent to completion. `Err` means the process could not be run
    /// at all; a non-zero exit is reported through the output.
    fn run(&self, request: &ExecRequest) -> Result<CommandOutput>;
}

/// Runner that spawns the agent as a child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl AgentRunner for ProcessRunner {
    #[instrument(skip_all, fields(program = %request.program.display()))]
    fn run(&self, request: &ExecRequest) -> Result<CommandOutput> {
        info!(workdir = %request.workdir.display(), args = request.args.len(), "starting agent");
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .envs(&request.env)
            .current_dir(&request.workdir);

        let output = run_command(
            cmd,
            request.stdin.as_ref().map(|s| s.as_bytes().to_vec()),
            request.output_limit_bytes,
        )?;
        if output.exit.success() {
            info!("agent finished");
        } else {
            warn!(exit = %output.exit, "agent failed");
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{agent, task};

    #[test]
    fn argument_mode_appends_prompt_after_all_args() {
        let mut a = agent("codex", "codex");
        a.definition.default_args = vec!["exec".to_string()];
        let mut t = task("t1");
        t.command_args = vec!["--fast".to_string()];

        let req = build_request(&a, &t, "do it", PathBuf::from("/w"));

        assert_eq!(req.args, vec!["exec", "--fast", "do it"]);
        assert_eq!(req.stdin, None);
        assert_eq!(req.workdir, PathBuf::from("/w"));
        assert_eq!(req.output_limit_bytes, OUTPUT_LIMIT_BYTES);
    }

    #[test]
    fn stdin_mode_keeps_prompt_out_of_args() {
        let mut a = agent("claude", "claude");
        a.definition.prompt_mode = PromptMode::Stdin;
        a.definition.default_args = vec!["-p".to_string()];

        let req = build_request(&a, &task("t1"), "hello", PathBuf::from("/w"));

        assert_eq!(req.args, vec!["-p"]);
        assert_eq!(req.stdin.as_deref(), Some("hello"));
    }

    #[test]
    fn task_env_overrides_agent_env() {
        let mut a = agent("codex", "codex");
        a.definition.env.insert("MODE".to_string(), "agent".to_string());
        a.definition.env.insert("ONLY_AGENT".to_string(), "1".to_string());
        let mut t = task("t1");
        t.env.insert("MODE".to_string(), "task".to_string());

        let req = build_request(&a, &t, "p", PathBuf::from("/w"));

        assert_eq!(req.env.get("MODE").map(String::as_str), Some("task"));
        assert_eq!(req.env.get("ONLY_AGENT").map(String::as_str), Some("1"));
    }

    #[test]
    fn workdir_joins_relative_cwd_and_keeps_absolute() {
        let base = Path::new("/repo");
        assert_eq!(resolve_workdir(base, None), PathBuf::from("/repo"));
        assert_eq!(resolve_workdir(base, Some("  ")), PathBuf::from("/repo"));
        assert_eq!(resolve_workdir(base, Some("sub/dir")), PathBuf::from("/repo/sub/dir"));
        assert_eq!(resolve_workdir(base, Some("/abs")), PathBuf::from("/abs"));
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_applies_env_and_workdir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let req = ExecRequest {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), "printf '%s' \"$GREETING\"; pwd >&2".to_string()],
            stdin: None,
            env: BTreeMap::from([("GREETING".to_string(), "hi".to_string())]),
            workdir: temp.path().to_path_buf(),
            output_limit_bytes: 1024,
        };

        let out = ProcessRunner.run(&req).expect("run");

        assert!(out.exit.success());
        assert_eq!(out.stdout, b"hi");
        let pwd = String::from_utf8_lossy(&out.stderr).trim().to_string();
        assert_eq!(
            PathBuf::from(pwd).canonicalize().expect("canon"),
            temp.path().canonicalize().expect("canon")
        );
    }

    #[test]
    fn process_runner_reports_missing_workdir_as_error() {
        let req = ExecRequest {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), "true".to_string()],
            stdin: None,
            env: BTreeMap::new(),
            workdir: PathBuf::from("/definitely/not/here"),
            output_limit_bytes: 1024,
        };
        assert!(ProcessRunner.run(&req).is_err());
    }
}
