//! Configuration types for the engine, storage, workspace, and session plugin wiring.

use std::fs;
use std::path::{Path, PathBuf};

use dirs::home_dir;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use toml::{from_str, to_string_pretty};
use tracing::debug;

use crate::types::StepKind;
use crate::{Error, Result};

/// Complete autopilot configuration.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutopilotConfig {
    /// Engine limits
    #[serde(default)]
    pub engine: EngineConfig,
    /// Session persistence
    #[serde(default)]
    pub storage: StorageConfig,
    /// Workspace configuration
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    /// Plugin wiring for new sessions
    #[serde(default)]
    pub session: SessionConfig,
}

/// Limits applied by the step engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum committed attempts per session before budget exhaustion
    pub max_total_steps: usize,
    /// Attempts per step when the step does not set its own bound
    pub default_max_attempts: u32,
    /// Per-attempt timeout in milliseconds
    pub step_timeout_ms: u64,
    /// Per-validator timeout in milliseconds
    pub validator_timeout_ms: u64,
    /// Maximum nesting depth for composite steps
    pub max_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_total_steps: 64,
            default_max_attempts: 3,
            step_timeout_ms: 120_000,
            validator_timeout_ms: 60_000,
            max_depth: 16,
        }
    }
}

/// Where session records are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one JSON record per session
    pub sessions_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            sessions_dir: base.join(".autopilot").join("sessions"),
        }
    }
}

/// Workspace configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root path of the workspace
    pub root_path: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("."),
        }
    }
}

/// Plugin category a [`PluginSpec`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    /// A validator run after each attempt
    Validator,
    /// The decision policy
    Policy,
    /// A capability (language model, editor, context provider)
    Capability,
}

impl PluginKind {
    /// Lowercase name used in error messages and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validator => "validator",
            Self::Policy => "policy",
            Self::Capability => "capability",
        }
    }
}

/// Declarative reference to a plugin: `{kind, name, parameters}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSpec {
    /// Registry to resolve against
    pub kind: PluginKind,
    /// Registered name
    pub name: String,
    /// Opaque construction parameters
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub parameters: Value,
}

impl PluginSpec {
    /// Policy reference.
    #[must_use]
    pub fn policy(name: impl Into<String>, parameters: Value) -> Self {
        Self {
            kind: PluginKind::Policy,
            name: name.into(),
            parameters,
        }
    }

    /// Validator reference.
    #[must_use]
    pub fn validator(name: impl Into<String>, parameters: Value) -> Self {
        Self {
            kind: PluginKind::Validator,
            name: name.into(),
            parameters,
        }
    }

    /// Capability reference.
    #[must_use]
    pub fn capability(name: impl Into<String>, parameters: Value) -> Self {
        Self {
            kind: PluginKind::Capability,
            name: name.into(),
            parameters,
        }
    }
}

/// Plugins wired into a new session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Decision policy
    pub policy: PluginSpec,
    /// Validators applied after each attempt, in order
    pub validators: Vec<PluginSpec>,
    /// Capabilities made available to steps
    pub capabilities: Vec<PluginSpec>,
    /// Step kinds that are skipped instead of executed
    pub disallowed_kinds: Vec<StepKind>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            policy: PluginSpec::policy("sequential", Value::Null),
            validators: Vec::new(),
            capabilities: vec![
                PluginSpec::capability("echo_model", Value::Null),
                PluginSpec::capability("workspace_editor", Value::Null),
                PluginSpec::capability("file_context", Value::Null),
            ],
            disallowed_kinds: Vec::new(),
        }
    }
}

impl AutopilotConfig {
    /// Get the default config directory path (`~/.autopilot`)
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn config_dir() -> Result<PathBuf> {
        let home = home_dir()
            .ok_or_else(|| Error::Other("Could not determine home directory".to_owned()))?;
        Ok(home.join(".autopilot"))
    }

    /// Get the default config file path (`~/.autopilot/config.toml`)
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load config from the default location, creating it with defaults if missing
    ///
    /// # Errors
    /// Returns an error if the config cannot be read or created
    pub fn load_or_create() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            let config = Self::default();
            config.save_to_file(&config_path)?;
            Ok(config)
        }
    }

    /// Load config from a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = from_str(&contents)?;

        debug!(
            "Loaded config from {:?}: policy={}, validators={}, capabilities={}",
            path,
            config.session.policy.name,
            config.session.validators.len(),
            config.session.capabilities.len()
        );

        Ok(config)
    }

    /// Save config to a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be written
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = to_string_pretty(self)?;

        let header = "# Autopilot Configuration File\n\
                      # This file is automatically generated on first run\n\
                      # Edit this file to customize your settings\n\n";

        fs::write(path, format!("{header}{contents}"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AutopilotConfig::default();
        assert_eq!(config.engine.max_total_steps, 64);
        assert_eq!(config.engine.default_max_attempts, 3);
        assert_eq!(config.session.policy.name, "sequential");
        assert!(config.session.disallowed_kinds.is_empty());
    }

    #[test]
    fn test_session_wiring_from_toml() {
        let toml_content = r#"
[engine]
max_total_steps = 10
default_max_attempts = 2

[workspace]
root_path = "/tmp/project"

[session]
disallowed_kinds = ["edit_file"]

[session.policy]
kind = "policy"
name = "random_exploration"
parameters = { seed = 7, picks = 2 }

[[session.validators]]
kind = "validator"
name = "output_pattern"
parameters = { pattern = "ok", field = "completion" }
"#;

        let config: AutopilotConfig = match from_str(toml_content) {
            Ok(config) => config,
            Err(error) => panic!("parse failed: {error}"),
        };
        assert_eq!(config.engine.max_total_steps, 10);
        assert_eq!(config.engine.step_timeout_ms, 120_000);
        assert_eq!(config.workspace.root_path, PathBuf::from("/tmp/project"));
        assert_eq!(config.session.policy.kind, PluginKind::Policy);
        assert_eq!(config.session.policy.parameters, json!({ "seed": 7, "picks": 2 }));
        assert_eq!(config.session.validators.len(), 1);
        assert_eq!(config.session.disallowed_kinds, [StepKind::EditFile]);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("tempdir failed: {error}"),
        };
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AutopilotConfig::default();
        config.engine.max_depth = 4;
        config.session.validators.push(PluginSpec::validator(
            "external_check",
            json!({ "command": "true" }),
        ));

        if let Err(error) = config.save_to_file(&path) {
            panic!("save failed: {error}");
        }
        let loaded = match AutopilotConfig::load_from_file(&path) {
            Ok(loaded) => loaded,
            Err(error) => panic!("load failed: {error}"),
        };
        assert_eq!(loaded, config);
    }
}
