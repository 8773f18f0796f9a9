//! Pass/fail checks run after each step attempt.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use autopilot_core::{Observation, Result, Step, StepKind};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, warn};

mod external_check;
mod output_pattern;

pub use external_check::ExternalCheckValidator;
pub use output_pattern::OutputPatternValidator;

/// Outcome of a single validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// The observation is acceptable
    Pass,
    /// The observation is rejected
    Fail(String),
}

impl Verdict {
    /// Whether the verdict is a pass.
    #[must_use]
    pub const fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// A check applied to `(Step, Observation)`.
///
/// Validators may perform I/O but never touch session state.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Registered name.
    fn name(&self) -> &str;

    /// Whether the validator should run for `step`.
    fn applies_to(&self, _step: &Step) -> bool {
        true
    }

    /// Checks the observation of one attempt.
    ///
    /// # Errors
    ///
    /// An error is treated as a failing verdict.
    async fn validate(&self, step: &Step, observation: &Observation) -> Result<Verdict>;
}

/// Verdict of one validator within a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorOutcome {
    /// Validator name
    pub validator: String,
    /// Its verdict
    pub verdict: Verdict,
    /// Time spent
    pub duration_ms: u64,
}

/// Combined result of every applicable validator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Outcomes in run order
    pub outcomes: Vec<ValidatorOutcome>,
}

impl ValidationReport {
    /// Whether every validator passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.verdict.is_pass())
    }

    /// Joined failure reasons, if any validator failed.
    #[must_use]
    pub fn failure_reason(&self) -> Option<String> {
        let reasons: Vec<String> = self
            .outcomes
            .iter()
            .filter_map(|outcome| match &outcome.verdict {
                Verdict::Pass => None,
                Verdict::Fail(reason) => Some(format!("{}: {reason}", outcome.validator)),
            })
            .collect();
        if reasons.is_empty() {
            None
        } else {
            Some(reasons.join("; "))
        }
    }
}

/// Ordered set of validators with a per-invocation timeout.
#[derive(Clone)]
pub struct ValidatorRegistry {
    /// Validators in run order
    validators: Vec<Arc<dyn Validator>>,
    /// Time limit per validator invocation
    timeout: Duration,
    /// Stop at the first failing validator
    early_exit: bool,
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ValidatorRegistry {
    /// Registry running `validators` in order.
    #[must_use]
    pub fn new(validators: Vec<Arc<dyn Validator>>) -> Self {
        Self {
            validators,
            timeout: Duration::from_secs(60),
            early_exit: true,
        }
    }

    /// Sets the per-validator timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets whether to stop at the first failure.
    #[must_use]
    pub fn with_early_exit(mut self, early_exit: bool) -> Self {
        self.early_exit = early_exit;
        self
    }

    /// Adds a validator at the end.
    pub fn register(&mut self, validator: Arc<dyn Validator>) {
        self.validators.push(validator);
    }

    /// Number of registered validators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Whether no validators are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Runs every applicable validator against one attempt.
    ///
    /// Errors and timeouts become failing verdicts. Composite steps are checked
    /// through their children and are skipped here.
    pub async fn validate(&self, step: &Step, observation: &Observation) -> ValidationReport {
        let mut report = ValidationReport::default();
        if step.kind == StepKind::Composite {
            return report;
        }

        for validator in &self.validators {
            if !validator.applies_to(step) {
                continue;
            }
            let start = Instant::now();
            let verdict = match timeout(self.timeout, validator.validate(step, observation)).await {
                Ok(Ok(verdict)) => verdict,
                Ok(Err(error)) => {
                    warn!(validator = validator.name(), step_id = %step.id, "Validator errored: {error}");
                    Verdict::Fail(error.to_string())
                }
                Err(_elapsed) => Verdict::Fail(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                )),
            };
            debug!(
                validator = validator.name(),
                step_id = %step.id,
                passed = verdict.is_pass(),
                "Validator verdict"
            );
            let failed = !verdict.is_pass();
            report.outcomes.push(ValidatorOutcome {
                validator: validator.name().to_owned(),
                verdict,
                duration_ms: start.elapsed().as_millis() as u64,
            });
            if failed && self.early_exit {
                break;
            }
        }
        report
    }
}

/// Applies the optional `kinds` filter shared by the built-in validators.
fn applies_to_kinds(kinds: Option<&[StepKind]>, step: &Step) -> bool {
    kinds.is_none_or(|kinds| kinds.contains(&step.kind))
}
