//! Orchestrator configuration stored at `<home>/config.json`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Process-wide daemon configuration (JSON, camelCase keys).
///
/// Re-read every loop iteration so edits take effect without a restart.
/// Missing fields default to the documented values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct DaemonConfig {
    /// Sleep between iterations that found nothing runnable.
    pub poll_interval_ms: u64,

    /// `maxAttempts` for tasks that do not set one.
    pub default_max_attempts: u32,

    /// Fallback agent names, tried in order when a task has no preference.
    pub routing_order: Vec<String>,

    pub cleanup_worktree_on_success: bool,
    pub cleanup_worktree_on_failure: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            default_max_attempts: 2,
            routing_order: Vec::new(),
            cleanup_worktree_on_success: false,
            cleanup_worktree_on_failure: false,
        }
    }
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_max_attempts == 0 {
            return Err(anyhow!("defaultMaxAttempts must be > 0"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Load config from a JSON file.
///
/// If the file is missing, returns `DaemonConfig::default()`.
pub fn load_config(path: &Path) -> Result<DaemonConfig> {
    if !path.exists() {
        return Ok(DaemonConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DaemonConfig =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Load config, substituting defaults when the file is unreadable or invalid.
///
/// A broken config file must never stop the daemon; the failure is logged.
pub fn load_config_or_default(path: &Path) -> DaemonConfig {
    match load_config(path) {
        Ok(cfg) => {
            debug!(path = %path.display(), "config loaded");
            cfg
        }
        Err(err) => {
            warn!(path = %path.display(), err = %format!("{err:#}"), "config invalid, using defaults");
            DaemonConfig::default()
        }
    }
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DaemonConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = serde_json::to_string_pretty(cfg).context("serialize config json")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
