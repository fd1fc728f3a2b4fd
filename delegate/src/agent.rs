//! Agent definitions: named external executables that consume a prompt.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How the prompt text reaches the agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    /// Appended as the final positional argument.
    #[default]
    Argument,
    /// Written to the process's standard input.
    Stdin,
}

/// Agent definition as written in an agent file, normalized to defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub name: String,
    pub command: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub prompt_mode: PromptMode,
    #[serde(default)]
    pub default_args: Vec<String>,
    #[serde(default = "default_true")]
    pub use_worktree: bool,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

/// An eligible agent: enabled, with its executable resolved on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub definition: AgentDefinition,
    /// Absolute path the `command` resolved to during registry load.
    pub executable: PathBuf,
    /// File the winning definition was read from.
    pub source: PathBuf,
}

impl Agent {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn command(&self) -> &str {
        &self.definition.command
    }

    pub fn prompt_mode(&self) -> PromptMode {
        self.definition.prompt_mode
    }

    pub fn use_worktree(&self) -> bool {
        self.definition.use_worktree
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_defaults_apply_when_fields_absent() {
        let def: AgentDefinition =
            serde_json::from_str(r#"{"name":"codex","command":"codex"}"#).expect("parse");
        assert!(def.enabled);
        assert!(def.use_worktree);
        assert_eq!(def.prompt_mode, PromptMode::Argument);
        assert!(def.default_args.is_empty());
        assert!(def.env.is_empty());
    }

    #[test]
    fn prompt_mode_parses_stdin() {
        let def: AgentDefinition =
            serde_json::from_str(r#"{"name":"a","command":"a","promptMode":"stdin"}"#)
                .expect("parse");
        assert_eq!(def.prompt_mode, PromptMode::Stdin);
    }
}
