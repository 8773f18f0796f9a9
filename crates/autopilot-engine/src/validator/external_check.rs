use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use autopilot_core::{Error, Observation, Result, Step, StepKind};
use serde::Deserialize;
use serde_json::{Value, from_value};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{Validator, Verdict, applies_to_kinds};

/// Lines of stderr kept in a failure reason.
const STDERR_LINES: usize = 3;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExternalCheckParams {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    cwd: Option<PathBuf>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    kinds: Option<Vec<StepKind>>,
}

/// Runs an external command (a test runner, a linter) and passes on exit status 0.
#[derive(Debug)]
pub struct ExternalCheckValidator {
    command: String,
    args: Vec<String>,
    cwd: PathBuf,
    timeout: Option<Duration>,
    kinds: Option<Vec<StepKind>>,
}

impl ExternalCheckValidator {
    /// Builds the validator from plugin parameters; relative `cwd` values
    /// resolve against `workspace_root`.
    ///
    /// # Errors
    /// Returns a configuration error if `command` is missing or empty.
    pub fn from_parameters(parameters: &Value, workspace_root: &Path) -> Result<Self> {
        let params: ExternalCheckParams = from_value(parameters.clone())
            .map_err(|error| Error::Configuration(format!("external_check parameters: {error}")))?;
        if params.command.trim().is_empty() {
            return Err(Error::Configuration(
                "external_check requires a non-empty command".to_owned(),
            ));
        }
        let cwd = params
            .cwd
            .map_or_else(|| workspace_root.to_path_buf(), |cwd| workspace_root.join(cwd));
        Ok(Self {
            command: params.command,
            args: params.args,
            cwd,
            timeout: params.timeout_ms.map(Duration::from_millis),
            kinds: params.kinds,
        })
    }

    async fn run(&self) -> Result<Verdict> {
        debug!(command = %self.command, cwd = %self.cwd.display(), "Running external check");
        let output = Command::new(&self.command)
            .args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|error| {
                Error::Capability(format!("failed to run '{}': {error}", self.command))
            })?;

        if output.status.success() {
            return Ok(Verdict::Pass);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let excerpt = stderr
            .lines()
            .take(STDERR_LINES)
            .collect::<Vec<_>>()
            .join("; ");
        let status = output
            .status
            .code()
            .map_or_else(|| "signal".to_owned(), |code| code.to_string());
        Ok(Verdict::Fail(if excerpt.is_empty() {
            format!("'{}' exited with {status}", self.command)
        } else {
            format!("'{}' exited with {status}: {excerpt}", self.command)
        }))
    }
}

#[async_trait]
impl Validator for ExternalCheckValidator {
    fn name(&self) -> &str {
        "external_check"
    }

    fn applies_to(&self, step: &Step) -> bool {
        applies_to_kinds(self.kinds.as_deref(), step)
    }

    async fn validate(&self, _step: &Step, _observation: &Observation) -> Result<Verdict> {
        match self.timeout {
            Some(limit) => timeout(limit, self.run())
                .await
                .map_err(|_elapsed| Error::Timeout(limit.as_millis() as u64))?,
            None => self.run().await,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator(parameters: &Value) -> ExternalCheckValidator {
        match ExternalCheckValidator::from_parameters(parameters, Path::new(".")) {
            Ok(validator) => validator,
            Err(error) => panic!("invalid parameters: {error}"),
        }
    }

    async fn verdict(validator: &ExternalCheckValidator) -> Result<Verdict> {
        validator
            .validate(&Step::message("x"), &Observation::success("x"))
            .await
    }

    #[tokio::test]
    async fn test_exit_status_decides_verdict() {
        assert!(matches!(verdict(&validator(&json!({ "command": "true" }))).await, Ok(Verdict::Pass)));

        let failing = validator(&json!({
            "command": "sh",
            "args": ["-c", "echo broken >&2; exit 3"]
        }));
        match verdict(&failing).await {
            Ok(Verdict::Fail(reason)) => {
                assert!(reason.contains("exited with 3"));
                assert!(reason.contains("broken"));
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let slow = validator(&json!({ "command": "sleep", "args": ["5"], "timeout_ms": 50 }));
        assert!(matches!(verdict(&slow).await, Err(Error::Timeout(50))));
    }

    #[tokio::test]
    async fn test_missing_binary_is_capability_error() {
        let missing = validator(&json!({ "command": "definitely-not-a-real-binary-xyz" }));
        assert!(matches!(verdict(&missing).await, Err(Error::Capability(_))));
    }

    #[test]
    fn test_command_is_required() {
        assert!(matches!(
            ExternalCheckValidator::from_parameters(&json!({}), Path::new(".")),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            ExternalCheckValidator::from_parameters(&json!({ "command": " " }), Path::new(".")),
            Err(Error::Configuration(_))
        ));
    }
}
