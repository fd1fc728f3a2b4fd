//! Home-directory layout and `delegate init` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;

use super::config::{DaemonConfig, write_config};

/// All canonical paths under a delegate home root.
#[derive(Debug, Clone)]
pub struct HomePaths {
    pub home: PathBuf,
    pub inbox_dir: PathBuf,
    pub processing_dir: PathBuf,
    pub completed_dir: PathBuf,
    pub failed_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub worktrees_dir: PathBuf,
    pub agents_dir: PathBuf,
    pub config_path: PathBuf,
    pub events_path: PathBuf,
    pub gitignore_path: PathBuf,
}

impl HomePaths {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            inbox_dir: home.join("inbox"),
            processing_dir: home.join("processing"),
            completed_dir: home.join("completed"),
            failed_dir: home.join("failed"),
            runs_dir: home.join("runs"),
            worktrees_dir: home.join("worktrees"),
            agents_dir: home.join("agents"),
            config_path: home.join("config.json"),
            events_path: home.join("events.jsonl"),
            gitignore_path: home.join(".gitignore"),
            home,
        }
    }

    /// Directories a task file can live in, in lifecycle order.
    pub fn queue_dirs(&self) -> [(&'static str, &Path); 4] {
        [
            ("inbox", &self.inbox_dir),
            ("processing", &self.processing_dir),
            ("completed", &self.completed_dir),
            ("failed", &self.failed_dir),
        ]
    }

    fn required_dirs(&self) -> [&Path; 8] {
        [
            &self.home,
            &self.inbox_dir,
            &self.processing_dir,
            &self.completed_dir,
            &self.failed_dir,
            &self.runs_dir,
            &self.worktrees_dir,
            &self.agents_dir,
        ]
    }
}

/// Create every directory the daemon needs. Failure here is fatal at startup.
pub fn ensure_layout(paths: &HomePaths) -> Result<()> {
    for dir in paths.required_dirs() {
        create_dir(dir)?;
    }
    Ok(())
}

/// Options for `init_home`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing delegate-owned files.
    pub force: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExampleAgent {
    name: &'static str,
    command: &'static str,
    enabled: bool,
    description: &'static str,
    prompt_mode: &'static str,
    default_args: Vec<&'static str>,
    use_worktree: bool,
}

/// Scaffold a delegate home: directories, default config, `.gitignore`, and a
/// disabled example agent.
///
/// Fails if `config.json` already exists unless `options.force` is set.
pub fn init_home(paths: &HomePaths, options: &InitOptions) -> Result<()> {
    if paths.home.exists() && !paths.home.is_dir() {
        return Err(anyhow!(
            "delegate init: {} exists but is not a directory",
            paths.home.display()
        ));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "delegate init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    ensure_layout(paths)?;
    write_config(&paths.config_path, &DaemonConfig::default())?;
    write_file(&paths.gitignore_path, HOME_GITIGNORE)?;
    write_json(&paths.agents_dir.join("example.json"), &example_agent())?;
    Ok(())
}

fn example_agent() -> ExampleAgent {
    ExampleAgent {
        name: "example",
        command: "codex",
        enabled: false,
        description: "Template agent definition; set enabled to true to use it",
        prompt_mode: "argument",
        default_args: vec!["exec"],
        use_worktree: true,
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_file(path, &buf)
}

const HOME_GITIGNORE: &str =
    "inbox/\nprocessing/\ncompleted/\nfailed/\nruns/\nworktrees/\nevents.jsonl\n";
