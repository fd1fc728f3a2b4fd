//! Agent registry: definitions merged from ranked source directories.
//!
//! Directories are read in the order given. Within a directory, `*.json` files
//! are read in lexicographic order. When two files define the same `name`, the
//! one read later replaces the earlier one in place, so callers pass shared
//! directories first and project-local directories last. Eligibility (enabled,
//! executable resolvable) is decided after the merge, which lets a local file
//! disable a shared agent of the same name.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::agent::{Agent, AgentDefinition};
use crate::io::schema::{AGENT_SCHEMA, validate_schema};
use crate::io::which::which;

/// Why a definition did not make it into the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// File could not be read, parsed, or validated.
    Invalid(String),
    /// `enabled` is false.
    Disabled,
    /// `command` does not resolve to an executable on this host.
    CommandNotFound,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Invalid(msg) => write!(f, "invalid: {msg}"),
            SkipReason::Disabled => f.write_str("disabled"),
            SkipReason::CommandNotFound => f.write_str("command not found"),
        }
    }
}

/// A definition file that was read but is not eligible for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedAgent {
    pub name: Option<String>,
    pub source: PathBuf,
    pub reason: SkipReason,
}

/// Result of loading the registry.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    /// Eligible agents in merge order.
    pub agents: Vec<Agent>,
    pub skipped: Vec<SkippedAgent>,
}

/// Load the registry, resolving commands on the current `PATH`.
///
/// Relative commands containing a separator resolve against `base`.
pub fn load_agents(dirs: &[PathBuf], base: &Path) -> Registry {
    load_agents_with(dirs, |command| which(command, base))
}

/// Load the registry with an explicit executable resolver.
#[instrument(skip_all, fields(sources = dirs.len()))]
pub fn load_agents_with<F>(dirs: &[PathBuf], resolve: F) -> Registry
where
    F: Fn(&str) -> Option<PathBuf>,
{
    let mut merged: Vec<(AgentDefinition, PathBuf)> = Vec::new();
    let mut skipped = Vec::new();

    for dir in dirs {
        let files = match definition_files(dir) {
            Ok(files) => files,
            Err(err) => {
                warn!(dir = %dir.display(), err = %format!("{err:#}"), "cannot read agent directory");
                continue;
            }
        };
        for path in files {
            match read_definition(&path) {
                Ok(def) => {
                    if let Some(slot) = merged.iter_mut().find(|(d, _)| d.name == def.name) {
                        debug!(name = %def.name, source = %path.display(), "agent overridden");
                        *slot = (def, path);
                    } else {
                        merged.push((def, path));
                    }
                }
                Err(err) => {
                    let msg = format!("{err:#}");
                    warn!(source = %path.display(), err = %msg, "skipping agent definition");
                    skipped.push(SkippedAgent {
                        name: None,
                        source: path,
                        reason: SkipReason::Invalid(msg),
                    });
                }
            }
        }
    }

    let mut agents = Vec::new();
    for (definition, source) in merged {
        if !definition.enabled {
            debug!(name = %definition.name, "agent disabled");
            skipped.push(SkippedAgent {
                name: Some(definition.name),
                source,
                reason: SkipReason::Disabled,
            });
            continue;
        }
        let Some(executable) = resolve(&definition.command) else {
            warn!(name = %definition.name, command = %definition.command, "agent command not found");
            skipped.push(SkippedAgent {
                name: Some(definition.name),
                source,
                reason: SkipReason::CommandNotFound,
            });
            continue;
        };
        agents.push(Agent {
            definition,
            executable,
            source,
        });
    }

    debug!(
        eligible = agents.len(),
        skipped = skipped.len(),
        "agent registry loaded"
    );
    Registry { agents, skipped }
}

fn definition_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry
            .with_context(|| format!("read entry in {}", dir.display()))?
            .path();
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        if is_json && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_definition(path: &Path) -> Result<AgentDefinition> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    validate_schema(AGENT_SCHEMA, &value)?;
    let def: AgentDefinition = serde_json::from_value(value)
        .with_context(|| format!("deserialize {}", path.display()))?;
    if def.name.trim().is_empty() || def.command.trim().is_empty() {
        return Err(anyhow!("name and command must not be blank"));
    }
    Ok(def)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, file: &str, body: &str) {
        fs::create_dir_all(dir).expect("mkdir");
        fs::write(dir.join(file), body).expect("write");
    }

    fn resolve_all(command: &str) -> Option<PathBuf> {
        Some(PathBuf::from("/usr/bin").join(command))
    }

    fn names(registry: &Registry) -> Vec<&str> {
        registry.agents.iter().map(Agent::name).collect()
    }

    #[test]
    fn local_definition_overrides_shared_one() {
        let temp = tempfile::tempdir().expect("tempdir");
        let shared = temp.path().join("shared");
        let local = temp.path().join("local");
        write(&shared, "codex.json", r#"{"name":"codex","command":"codex","defaultArgs":["exec"]}"#);
        write(&local, "mine.json", r#"{"name":"codex","command":"codex-dev"}"#);

        let registry = load_agents_with(&[shared, local.clone()], resolve_all);

        assert_eq!(names(&registry), vec!["codex"]);
        let agent = &registry.agents[0];
        assert_eq!(agent.command(), "codex-dev");
        assert!(agent.definition.default_args.is_empty());
        assert_eq!(agent.source, local.join("mine.json"));
    }

    #[test]
    fn override_keeps_first_seen_position() {
        let temp = tempfile::tempdir().expect("tempdir");
        let shared = temp.path().join("shared");
        let local = temp.path().join("local");
        write(&shared, "a.json", r#"{"name":"alpha","command":"a"}"#);
        write(&shared, "b.json", r#"{"name":"beta","command":"b"}"#);
        write(&local, "a.json", r#"{"name":"alpha","command":"a2"}"#);

        let registry = load_agents_with(&[shared, local], resolve_all);
        assert_eq!(names(&registry), vec!["alpha", "beta"]);
        assert_eq!(registry.agents[0].command(), "a2");
    }

    #[test]
    fn local_disable_removes_shared_agent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let shared = temp.path().join("shared");
        let local = temp.path().join("local");
        write(&shared, "codex.json", r#"{"name":"codex","command":"codex"}"#);
        write(&local, "codex.json", r#"{"name":"codex","command":"codex","enabled":false}"#);

        let registry = load_agents_with(&[shared, local], resolve_all);
        assert!(registry.agents.is_empty());
        assert_eq!(registry.skipped[0].reason, SkipReason::Disabled);
    }

    #[test]
    fn malformed_file_is_skipped_without_aborting_load() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("agents");
        write(&dir, "a-broken.json", "{ nope");
        write(&dir, "b-missing-command.json", r#"{"name":"x"}"#);
        write(&dir, "c-good.json", r#"{"name":"good","command":"good"}"#);
        write(&dir, "readme.md", "not an agent");

        let registry = load_agents_with(&[dir], resolve_all);

        assert_eq!(names(&registry), vec!["good"]);
        assert_eq!(registry.skipped.len(), 2);
        assert!(
            registry
                .skipped
                .iter()
                .all(|s| matches!(s.reason, SkipReason::Invalid(_)))
        );
    }

    #[test]
    fn unresolvable_command_is_dropped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("agents");
        write(&dir, "a.json", r#"{"name":"here","command":"here"}"#);
        write(&dir, "b.json", r#"{"name":"gone","command":"gone"}"#);

        let registry = load_agents_with(&[dir], |command| {
            (command == "here").then(|| PathBuf::from("/bin/here"))
        });

        assert_eq!(names(&registry), vec!["here"]);
        assert_eq!(registry.agents[0].executable, PathBuf::from("/bin/here"));
        assert_eq!(registry.skipped[0].reason, SkipReason::CommandNotFound);
    }

    #[test]
    fn missing_directories_are_ignored() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = load_agents_with(&[temp.path().join("nope")], resolve_all);
        assert!(registry.agents.is_empty());
        assert!(registry.skipped.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn load_agents_resolves_real_commands() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("agents");
        write(&dir, "sh.json", r#"{"name":"shell","command":"sh"}"#);
        write(
            &dir,
            "nope.json",
            r#"{"name":"nope","command":"definitely-not-a-real-binary-42"}"#,
        );

        let registry = load_agents(&[dir], temp.path());
        assert_eq!(names(&registry), vec!["shell"]);
        assert!(registry.agents[0].executable.is_absolute());
    }
}
