//! Test-only fixtures: agents, tasks, scratch homes, and a scripted runner.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Result, anyhow};
use serde_json::Map;
use tempfile::TempDir;

use crate::agent::{Agent, AgentDefinition, PromptMode};
use crate::core::types::ExitOutcome;
use crate::io::events::{Event, EventLog};
use crate::io::executor::{AgentRunner, ExecRequest};
use crate::io::init::ensure_layout;
use crate::io::process::CommandOutput;
use crate::io::queue::QueueStore;
use crate::settings::Settings;
use crate::task::Task;

/// An eligible agent with default settings, resolved to `/usr/bin/<command>`.
pub fn agent(name: &str, command: &str) -> Agent {
    Agent {
        definition: AgentDefinition {
            name: name.to_string(),
            command: command.to_string(),
            enabled: true,
            description: None,
            prompt_mode: PromptMode::Argument,
            default_args: Vec::new(),
            use_worktree: true,
            env: BTreeMap::new(),
        },
        executable: PathBuf::from("/usr/bin").join(command),
        source: PathBuf::from(format!("{name}.json")),
    }
}

/// A valid task with default retry settings and no routing preference.
pub fn task(id: &str) -> Task {
    Task {
        id: id.to_string(),
        title: id.to_string(),
        prompt: format!("{id} prompt"),
        agent: None,
        tool: None,
        cwd: None,
        command_args: Vec::new(),
        env: BTreeMap::new(),
        max_attempts: 2,
        attempt: 0,
        last_error: None,
        last_tried_at: None,
        created_at: None,
        extra: Map::new(),
    }
}

/// Initialize a git repository at `path` with one commit containing `README.md`.
pub fn init_git_repo(path: &Path) {
    git(path, &["init", "-q"]);
    fs::write(path.join("README.md"), "# test\n").expect("write readme");
    git(path, &["add", "README.md"]);
    git(
        path,
        &[
            "-c",
            "user.name=Delegate Test",
            "-c",
            "user.email=test@example.com",
            "commit",
            "-q",
            "-m",
            "init",
        ],
    );
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("spawn git");
    assert!(status.success(), "git {} failed", args.join(" "));
}

/// A scratch delegate home with its layout created.
///
/// The repository root is an empty, non-git directory unless
/// [`TestHome::with_git_repo`] is used.
pub struct TestHome {
    _temp: TempDir,
    pub settings: Settings,
}

impl TestHome {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = temp.path().join("repo");
        fs::create_dir_all(&repo).expect("create repo dir");
        let settings = Settings::new(temp.path().join("home"), repo);
        ensure_layout(&settings.paths).expect("layout");
        Self {
            _temp: temp,
            settings,
        }
    }

    pub fn with_git_repo() -> Self {
        let home = Self::new();
        init_git_repo(&home.settings.repo_root);
        home
    }

    pub fn submit_raw(&self, file_name: &str, contents: &str) -> PathBuf {
        let path = self.settings.paths.inbox_dir.join(file_name);
        fs::write(&path, contents).expect("write task");
        path
    }

    pub fn write_agent(&self, file_name: &str, contents: &str) -> PathBuf {
        let path = self.settings.paths.agents_dir.join(file_name);
        fs::write(&path, contents).expect("write agent");
        path
    }

    pub fn events(&self) -> Vec<Event> {
        EventLog::new(&self.settings.paths.events_path)
            .read_all()
            .expect("read events")
    }

    pub fn count(&self, dir: &Path) -> usize {
        QueueStore::count(dir).expect("count")
    }

    /// File names in `dir`, sorted.
    pub fn files(&self, dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }
}

impl Default for TestHome {
    fn default() -> Self {
        Self::new()
    }
}

/// Predetermined result of one scripted agent run.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    pub exit: ExitOutcome,
    pub stdout: String,
    pub stderr: String,
}

impl ScriptedRun {
    pub fn exit(code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            exit: ExitOutcome::Code(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }
}

/// Runner that replays queued results and records every request.
pub struct ScriptedRunner {
    runs: RefCell<VecDeque<std::result::Result<ScriptedRun, String>>>,
    requests: RefCell<Vec<ExecRequest>>,
}

impl ScriptedRunner {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: RefCell::new(runs.into_iter().map(Ok).collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// A runner whose first run fails to launch with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            runs: RefCell::new(VecDeque::from([Err(message.to_string())])),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests.borrow().clone()
    }
}

impl AgentRunner for ScriptedRunner {
    fn run(&self, request: &ExecRequest) -> Result<CommandOutput> {
        self.requests.borrow_mut().push(request.clone());
        match self.runs.borrow_mut().pop_front() {
            Some(Ok(run)) => Ok(CommandOutput {
                exit: run.exit,
                stdout: run.stdout.into_bytes(),
                stderr: run.stderr.into_bytes(),
                stdout_truncated: 0,
                stderr_truncated: 0,
            }),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted runner has no runs left")),
        }
    }
}
