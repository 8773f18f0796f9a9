//! Resolution of declarative `{kind, name, parameters}` plugin references.
//!
//! Each plugin kind has its own closed name-to-factory table. Unknown names are
//! configuration errors; nothing falls back to a default implementation.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use autopilot_core::{Error, PluginKind, PluginSpec, Result, SessionConfig, StepKind};
use serde_json::Value;
use tracing::{debug, info};

use crate::builtin::{EchoModel, FileContextProvider, WorkspaceEditor};
use crate::engine::{Capabilities, Capability};
use crate::policy::{DepthFirstSearchPolicy, Policy, RandomExplorationPolicy, SequentialPolicy};
use crate::validator::{
    ExternalCheckValidator, OutputPatternValidator, Validator, ValidatorRegistry,
};

/// Builds a policy from its parameters.
pub type PolicyFactory = Arc<dyn Fn(&Value, &Path) -> Result<Box<dyn Policy>> + Send + Sync>;
/// Builds a validator from its parameters.
pub type ValidatorFactory = Arc<dyn Fn(&Value, &Path) -> Result<Arc<dyn Validator>> + Send + Sync>;
/// Builds a capability from its parameters.
pub type CapabilityFactory = Arc<dyn Fn(&Value, &Path) -> Result<Capability> + Send + Sync>;

/// Everything a session needs, resolved from its configuration.
pub struct ResolvedPlugins {
    /// Decision policy
    pub policy: Box<dyn Policy>,
    /// Validators in configured order
    pub validators: ValidatorRegistry,
    /// Capabilities available to steps
    pub capabilities: Capabilities,
    /// Kinds skipped instead of executed
    pub disallowed_kinds: Vec<StepKind>,
}

/// Name-to-factory registries for policies, validators, and capabilities.
#[derive(Clone)]
pub struct PluginLoader {
    /// Root passed to every factory
    workspace_root: PathBuf,
    policies: HashMap<String, PolicyFactory>,
    validators: HashMap<String, ValidatorFactory>,
    capabilities: HashMap<String, CapabilityFactory>,
}

impl fmt::Debug for PluginLoader {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut policies: Vec<&String> = self.policies.keys().collect();
        let mut validators: Vec<&String> = self.validators.keys().collect();
        let mut capabilities: Vec<&String> = self.capabilities.keys().collect();
        policies.sort();
        validators.sort();
        capabilities.sort();
        formatter
            .debug_struct("PluginLoader")
            .field("workspace_root", &self.workspace_root)
            .field("policies", &policies)
            .field("validators", &validators)
            .field("capabilities", &capabilities)
            .finish()
    }
}

impl PluginLoader {
    /// Loader with empty registries.
    #[must_use]
    pub fn empty(workspace_root: PathBuf) -> Self {
        Self {
            workspace_root,
            policies: HashMap::new(),
            validators: HashMap::new(),
            capabilities: HashMap::new(),
        }
    }

    /// Loader with every built-in plugin registered.
    #[must_use]
    pub fn with_builtins(workspace_root: PathBuf) -> Self {
        let mut loader = Self::empty(workspace_root);

        loader.register_policy("sequential", |parameters, _root| {
            Ok(Box::new(SequentialPolicy::from_parameters(parameters)?))
        });
        loader.register_policy("random_exploration", |parameters, _root| {
            Ok(Box::new(RandomExplorationPolicy::from_parameters(parameters)?))
        });
        loader.register_policy("depth_first_search", |parameters, _root| {
            Ok(Box::new(DepthFirstSearchPolicy::from_parameters(parameters)?))
        });

        loader.register_validator("output_pattern", |parameters, _root| {
            Ok(Arc::new(OutputPatternValidator::from_parameters(parameters)?))
        });
        loader.register_validator("external_check", |parameters, root| {
            Ok(Arc::new(ExternalCheckValidator::from_parameters(parameters, root)?))
        });

        loader.register_capability("echo_model", |parameters, _root| {
            Ok(Capability::Model(Arc::new(EchoModel::from_parameters(parameters)?)))
        });
        loader.register_capability("workspace_editor", |_parameters, root| {
            Ok(Capability::Editor(Arc::new(WorkspaceEditor::new(root.to_path_buf()))))
        });
        loader.register_capability("file_context", |_parameters, root| {
            Ok(Capability::ContextProvider(Arc::new(FileContextProvider::new(
                root.to_path_buf(),
            ))))
        });

        loader
    }

    /// Workspace root handed to factories.
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Registers (or replaces) a policy factory.
    pub fn register_policy<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Value, &Path) -> Result<Box<dyn Policy>> + Send + Sync + 'static,
    {
        self.policies.insert(name.to_owned(), Arc::new(factory));
    }

    /// Registers (or replaces) a validator factory.
    pub fn register_validator<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Value, &Path) -> Result<Arc<dyn Validator>> + Send + Sync + 'static,
    {
        self.validators.insert(name.to_owned(), Arc::new(factory));
    }

    /// Registers (or replaces) a capability factory.
    pub fn register_capability<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Value, &Path) -> Result<Capability> + Send + Sync + 'static,
    {
        self.capabilities.insert(name.to_owned(), Arc::new(factory));
    }

    /// Registered names for `kind`, sorted.
    #[must_use]
    pub fn names(&self, kind: PluginKind) -> Vec<&str> {
        let mut names: Vec<&str> = match kind {
            PluginKind::Policy => self.policies.keys().map(String::as_str).collect(),
            PluginKind::Validator => self.validators.keys().map(String::as_str).collect(),
            PluginKind::Capability => self.capabilities.keys().map(String::as_str).collect(),
        };
        names.sort_unstable();
        names
    }

    fn unknown(&self, kind: PluginKind, name: &str) -> Error {
        Error::Configuration(format!(
            "unknown {} '{name}' (known: {})",
            kind.as_str(),
            self.names(kind).join(", ")
        ))
    }

    fn check_kind(spec: &PluginSpec, expected: PluginKind) -> Result<()> {
        if spec.kind == expected {
            Ok(())
        } else {
            Err(Error::Configuration(format!(
                "'{}' is declared as a {} but used as a {}",
                spec.name,
                spec.kind.as_str(),
                expected.as_str()
            )))
        }
    }

    /// Constructs the policy named by `spec`.
    ///
    /// # Errors
    /// Returns a configuration error for an unknown name, a kind mismatch, or bad parameters.
    pub fn load_policy(&self, spec: &PluginSpec) -> Result<Box<dyn Policy>> {
        Self::check_kind(spec, PluginKind::Policy)?;
        let factory = self
            .policies
            .get(&spec.name)
            .ok_or_else(|| self.unknown(PluginKind::Policy, &spec.name))?;
        debug!(name = %spec.name, "Resolving policy");
        factory(&spec.parameters, &self.workspace_root)
    }

    /// Constructs the validator `name` with `parameters`.
    ///
    /// # Errors
    /// Returns a configuration error for an unknown name or bad parameters.
    pub fn load_validator(&self, name: &str, parameters: &Value) -> Result<Arc<dyn Validator>> {
        let factory = self
            .validators
            .get(name)
            .ok_or_else(|| self.unknown(PluginKind::Validator, name))?;
        debug!(name, "Resolving validator");
        factory(parameters, &self.workspace_root)
    }

    /// Constructs the capability named by `spec`.
    ///
    /// # Errors
    /// Returns a configuration error for an unknown name, a kind mismatch, or bad parameters.
    pub fn load_capability(&self, spec: &PluginSpec) -> Result<Capability> {
        Self::check_kind(spec, PluginKind::Capability)?;
        let factory = self
            .capabilities
            .get(&spec.name)
            .ok_or_else(|| self.unknown(PluginKind::Capability, &spec.name))?;
        debug!(name = %spec.name, "Resolving capability");
        factory(&spec.parameters, &self.workspace_root)
    }

    /// Resolves every plugin a session configuration names.
    ///
    /// # Errors
    /// Returns the first configuration error encountered.
    pub fn resolve(
        &self,
        config: &SessionConfig,
        validator_timeout: Duration,
    ) -> Result<ResolvedPlugins> {
        let policy = self.load_policy(&config.policy)?;

        let mut validators = ValidatorRegistry::default().with_timeout(validator_timeout);
        for spec in &config.validators {
            Self::check_kind(spec, PluginKind::Validator)?;
            validators.register(self.load_validator(&spec.name, &spec.parameters)?);
        }

        let mut capabilities = Capabilities::new();
        for spec in &config.capabilities {
            capabilities.install(self.load_capability(spec)?);
        }

        info!(
            policy = %config.policy.name,
            validators = validators.len(),
            capabilities = config.capabilities.len(),
            "Resolved session plugins"
        );
        Ok(ResolvedPlugins {
            policy,
            validators,
            capabilities,
            disallowed_kinds: config.disallowed_kinds.clone(),
        })
    }
}
