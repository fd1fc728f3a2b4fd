//! Startup context resolved once by the binary and threaded through the loop.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::io::git::Git;
use crate::io::init::HomePaths;

pub const DEFAULT_BRANCH_PREFIX: &str = "delegate/";
pub const HOME_DIR_NAME: &str = ".delegate";

#[derive(Debug, Clone)]
pub struct Settings {
    pub paths: HomePaths,
    pub repo_root: PathBuf,
    pub branch_prefix: String,
    /// Shared agent definitions, read before `<home>/agents`. `None` disables it.
    pub global_agents_dir: Option<PathBuf>,
    /// Overrides `pollIntervalMs` from config when set.
    pub poll_interval: Option<Duration>,
}

/// Raw startup inputs, typically from CLI flags and environment.
#[derive(Debug, Clone, Default)]
pub struct SettingsInput {
    pub home: Option<PathBuf>,
    pub repo: Option<PathBuf>,
    pub branch_prefix: Option<String>,
    pub global_agents_dir: Option<PathBuf>,
    pub no_global_agents: bool,
    pub poll_interval_ms: Option<u64>,
}

impl Settings {
    /// Settings for a home and repository with every other knob at its default
    /// and no global agent source.
    pub fn new(home: impl Into<PathBuf>, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            paths: HomePaths::new(home),
            repo_root: repo_root.into(),
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
            global_agents_dir: None,
            poll_interval: None,
        }
    }

    /// Resolve settings relative to `cwd`.
    ///
    /// Without `--repo`, the repository root is the git top-level of `cwd`;
    /// failing to find one is fatal.
    pub fn resolve(input: SettingsInput, cwd: &Path) -> Result<Self> {
        let repo_root = match input.repo {
            Some(repo) => absolutize(cwd, &repo),
            None => Git::new(cwd)
                .show_toplevel()
                .context("resolve repository root (pass --repo to override)")?,
        };
        let home = input
            .home
            .map(|home| absolutize(cwd, &home))
            .unwrap_or_else(|| repo_root.join(HOME_DIR_NAME));
        let global_agents_dir = if input.no_global_agents {
            None
        } else {
            input
                .global_agents_dir
                .map(|dir| absolutize(cwd, &dir))
                .or_else(default_global_agents_dir)
        };
        Ok(Self {
            paths: HomePaths::new(home),
            repo_root,
            branch_prefix: input
                .branch_prefix
                .unwrap_or_else(|| DEFAULT_BRANCH_PREFIX.to_string()),
            global_agents_dir,
            poll_interval: input.poll_interval_ms.map(Duration::from_millis),
        })
    }

    /// Agent source directories, lowest precedence first.
    pub fn agent_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::with_capacity(2);
        if let Some(global) = &self.global_agents_dir {
            dirs.push(global.clone());
        }
        dirs.push(self.paths.agents_dir.clone());
        dirs
    }
}

/// `~/.delegate/agents`, when a user home directory is known.
pub fn default_global_agents_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(HOME_DIR_NAME).join("agents"))
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_inputs_win_and_relative_paths_resolve_against_cwd() {
        let cwd = Path::new("/work");
        let settings = Settings::resolve(
            SettingsInput {
                home: Some(PathBuf::from("state")),
                repo: Some(PathBuf::from("repo")),
                branch_prefix: Some("bots/".to_string()),
                global_agents_dir: Some(PathBuf::from("/shared/agents")),
                no_global_agents: false,
                poll_interval_ms: Some(10),
            },
            cwd,
        )
        .expect("resolve");

        assert_eq!(settings.repo_root, PathBuf::from("/work/repo"));
        assert_eq!(settings.paths.home, PathBuf::from("/work/state"));
        assert_eq!(settings.branch_prefix, "bots/");
        assert_eq!(settings.poll_interval, Some(Duration::from_millis(10)));
        assert_eq!(
            settings.agent_dirs(),
            vec![
                PathBuf::from("/shared/agents"),
                PathBuf::from("/work/state/agents")
            ]
        );
    }

    #[test]
    fn home_defaults_under_repo_root() {
        let settings = Settings::resolve(
            SettingsInput {
                repo: Some(PathBuf::from("/r")),
                no_global_agents: true,
                ..SettingsInput::default()
            },
            Path::new("/"),
        )
        .expect("resolve");
        assert_eq!(settings.paths.home, PathBuf::from("/r/.delegate"));
        assert_eq!(settings.branch_prefix, DEFAULT_BRANCH_PREFIX);
        assert_eq!(settings.agent_dirs(), vec![PathBuf::from("/r/.delegate/agents")]);
    }

    #[test]
    fn no_global_agents_overrides_explicit_dir() {
        let settings = Settings::resolve(
            SettingsInput {
                repo: Some(PathBuf::from("/r")),
                global_agents_dir: Some(PathBuf::from("/g")),
                no_global_agents: true,
                ..SettingsInput::default()
            },
            Path::new("/"),
        )
        .expect("resolve");
        assert_eq!(settings.global_agents_dir, None);
    }

    #[test]
    fn missing_repository_is_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = Settings::resolve(SettingsInput::default(), temp.path()).unwrap_err();
        assert!(format!("{err:#}").contains("resolve repository root"));
    }
}
