//! The step engine: executes steps, validates them with bounded retry, records
//! every attempt in the session history, and loops on the policy until done.

use core::future::Future;
use core::pin::Pin;
use std::path::Path;
use std::time::Duration;

use autopilot_core::config::EngineConfig;
use autopilot_core::{
    CompletionChunk, EntryStatus, Error, HistoryEntry, Observation, Result,
    SessionStatus, Step, StepId, StepKind,
};
use chrono::Utc;
use futures::StreamExt as _;
use serde_json::Value;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, SessionEvent, Topic, TopicKey};
use crate::plugins::PluginLoader;
use crate::policy::Policy;
use crate::session::{SessionState, SessionStore};
use crate::validator::{ValidatorRegistry, Verdict};

mod capabilities;

pub use capabilities::{Capabilities, Capability, ChannelInput};

/// Boxed future for recursive step execution.
type StepFuture<'run> = Pin<Box<dyn Future<Output = Result<StepOutcome>> + Send + 'run>>;

/// Terminal result of running one step (all of its attempts).
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Status of the last committed attempt
    pub status: EntryStatus,
    /// Observation of the last committed attempt
    pub observation: Observation,
}

impl StepOutcome {
    fn cancelled() -> Self {
        Self {
            status: EntryStatus::Cancelled,
            observation: Observation::from_error(&Error::Cancelled),
        }
    }
}

/// What one attempt produced before it is committed.
struct Execution {
    observation: Observation,
    /// Children actually run (composites only)
    ran: Vec<Step>,
}

impl Execution {
    fn leaf(observation: Observation) -> Self {
        Self {
            observation,
            ran: Vec::new(),
        }
    }
}

/// Where an attempt sits in the trace.
#[derive(Debug, Clone, Copy)]
struct Slot {
    depth: usize,
    parent: Option<StepId>,
    attempt: u32,
}

/// Copy of `step` as executed: composites record the children that ran.
fn snapshot(step: &Step, ran: Vec<Step>) -> Step {
    let mut snapshot = step.clone();
    if step.kind == StepKind::Composite {
        snapshot.children = ran;
    }
    snapshot
}

/// Drives one session to a terminal status.
///
/// The engine is the only writer of the session history. Steps run strictly
/// one at a time, nested steps included.
pub struct StepEngine {
    config: EngineConfig,
    capabilities: Capabilities,
    validators: ValidatorRegistry,
    bus: EventBus,
    loader: Option<PluginLoader>,
    store: Option<SessionStore>,
    cancel: CancellationToken,
    disallowed_kinds: Vec<StepKind>,
}

impl StepEngine {
    /// Engine publishing on `bus`, with no capabilities, validators, or storage.
    #[must_use]
    pub fn new(config: EngineConfig, bus: EventBus) -> Self {
        let validators = ValidatorRegistry::default()
            .with_timeout(Duration::from_millis(config.validator_timeout_ms));
        Self {
            config,
            capabilities: Capabilities::new(),
            validators,
            bus,
            loader: None,
            store: None,
            cancel: CancellationToken::new(),
            disallowed_kinds: Vec::new(),
        }
    }

    /// Sets the capabilities available to steps.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sets the validators run after each attempt.
    #[must_use]
    pub fn with_validators(mut self, validators: ValidatorRegistry) -> Self {
        self.validators = validators;
        self
    }

    /// Sets the loader used to resolve `RunValidator` steps.
    #[must_use]
    pub fn with_loader(mut self, loader: PluginLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Persists the session after every mutation.
    #[must_use]
    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Uses `cancel` as the session's cancellation signal.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Kinds committed as skipped instead of executed.
    #[must_use]
    pub fn with_disallowed_kinds(mut self, kinds: Vec<StepKind>) -> Self {
        self.disallowed_kinds = kinds;
        self
    }

    /// Cancellation signal of this engine.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Bus the engine publishes on.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn publish(&self, event: SessionEvent) {
        let key = TopicKey {
            session_id: event.session_id(),
            topic: event.topic(),
        };
        self.bus.publish(&key, event);
    }

    async fn persist(&self, state: &SessionState) -> Result<()> {
        match &self.store {
            Some(store) => store.save(state).await,
            None => Ok(()),
        }
    }

    /// Runs `initial` (if any) and then the policy's steps until the policy is
    /// done, the budget runs out, or the session is cancelled.
    ///
    /// A reloaded state continues from its existing history; an `initial` step
    /// that already finished is not run again.
    ///
    /// # Errors
    /// Returns an error if the session already finished or cannot be persisted.
    /// Step failures never surface here; they are recorded in the history.
    pub async fn run_session(
        &self,
        initial: Option<Step>,
        policy: &dyn Policy,
        mut state: SessionState,
    ) -> Result<SessionState> {
        state.mark_running()?;
        let session_id = state.session_id;
        info!(
            session_id = %session_id,
            policy = policy.name(),
            history_len = state.history().len(),
            "Session started"
        );
        self.publish(SessionEvent::SessionStarted {
            session_id,
            history_len: state.history().len(),
        });
        self.persist(&state).await?;

        let mut pending = initial.filter(|step| !state.history().is_finished(step.id));
        let status = loop {
            if self.cancel.is_cancelled() {
                break SessionStatus::Cancelled;
            }
            let step = match pending.take() {
                Some(step) => step,
                None => match policy.next(state.history()).await {
                    Some(step) => step,
                    None if policy.succeeded(state.history()) => break SessionStatus::Succeeded,
                    None => break SessionStatus::Failed,
                },
            };
            if state.history().len() >= self.config.max_total_steps {
                warn!(
                    session_id = %session_id,
                    budget = self.config.max_total_steps,
                    "Step budget exhausted"
                );
                break SessionStatus::BudgetExhausted;
            }
            let outcome = self.run_step(&mut state, &step, 0, None).await?;
            if outcome.status == EntryStatus::Cancelled {
                break SessionStatus::Cancelled;
            }
        };

        state.finish(status);
        self.persist(&state).await?;
        info!(session_id = %session_id, status = ?status, entries = state.history().len(), "Session finished");
        self.publish(SessionEvent::SessionFinished { session_id, status });
        if status == SessionStatus::Cancelled {
            for topic in Topic::ALL {
                self.bus
                    .publish(&TopicKey { session_id, topic }, SessionEvent::Cancelled { session_id });
            }
        }
        Ok(state)
    }

    /// Runs `step` with bounded retry, committing every attempt.
    ///
    /// Nested steps run through this same path at `depth + 1`.
    ///
    /// # Errors
    /// Returns an error only if the session cannot be persisted.
    pub fn run_step<'run>(
        &'run self,
        state: &'run mut SessionState,
        step: &'run Step,
        depth: usize,
        parent: Option<StepId>,
    ) -> StepFuture<'run> {
        Box::pin(async move {
            let mut slot = Slot {
                depth,
                parent,
                attempt: 1,
            };

            if depth > self.config.max_depth {
                let error = Error::Configuration(format!(
                    "nesting depth {depth} exceeds the limit of {}",
                    self.config.max_depth
                ));
                let observation = Observation::from_error(&error);
                self.commit(state, slot, snapshot(step, Vec::new()), observation.clone(), Some(error.to_string()), EntryStatus::Failed)
                    .await?;
                return Ok(StepOutcome {
                    status: EntryStatus::Failed,
                    observation,
                });
            }

            if self.disallowed_kinds.contains(&step.kind) {
                debug!(session_id = %state.session_id, step_id = %step.id, kind = ?step.kind, "Skipping disallowed step");
                self.announce(state, step, slot);
                let observation = Observation::success("skipped").with_payload("skipped", true);
                self.commit(state, slot, snapshot(step, Vec::new()), observation.clone(), None, EntryStatus::Succeeded)
                    .await?;
                return Ok(StepOutcome {
                    status: EntryStatus::Succeeded,
                    observation,
                });
            }

            let default_attempts = if step.kind == StepKind::Composite {
                1
            } else {
                self.config.default_max_attempts
            };
            let max_attempts = step.max_attempts.unwrap_or(default_attempts).max(1);

            loop {
                if self.cancel.is_cancelled() {
                    return Ok(StepOutcome::cancelled());
                }
                self.announce(state, step, slot);

                // Composite children commit their own cancelled entries, so a
                // composite is never dropped halfway through a commit.
                let result = if step.kind == StepKind::Composite {
                    self.attempt(state, step, depth).await
                } else {
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => Err(Error::Cancelled),
                        result = self.attempt(state, step, depth) => result,
                    }
                };

                let (entry_step, observation, failure, retryable) = match result {
                    Ok(execution) => {
                        let failure = (!execution.observation.success).then(|| {
                            execution.observation.error.as_ref().map_or_else(
                                || execution.observation.summary.clone(),
                                |error| error.message.clone(),
                            )
                        });
                        (snapshot(step, execution.ran), execution.observation, failure, true)
                    }
                    Err(Error::Cancelled) => {
                        let outcome = StepOutcome::cancelled();
                        let reason = Some(Error::Cancelled.to_string());
                        self.commit(state, slot, snapshot(step, Vec::new()), outcome.observation.clone(), reason, EntryStatus::Cancelled)
                            .await?;
                        return Ok(outcome);
                    }
                    Err(error) => {
                        let retryable = error.is_retryable();
                        let observation = Observation::from_error(&error);
                        (snapshot(step, Vec::new()), observation, Some(error.to_string()), retryable)
                    }
                };

                let status = match &failure {
                    None => EntryStatus::Succeeded,
                    Some(_) if retryable && slot.attempt < max_attempts => EntryStatus::Retrying,
                    Some(_) => EntryStatus::Failed,
                };
                self.commit(state, slot, entry_step, observation.clone(), failure, status)
                    .await?;
                if status != EntryStatus::Retrying {
                    return Ok(StepOutcome {
                        status,
                        observation,
                    });
                }
                slot.attempt += 1;
            }
        })
    }

    fn announce(&self, state: &SessionState, step: &Step, slot: Slot) {
        debug!(
            session_id = %state.session_id,
            step_id = %step.id,
            attempt = slot.attempt,
            depth = slot.depth,
            kind = ?step.kind,
            "Attempt started"
        );
        self.publish(SessionEvent::AttemptStarted {
            session_id: state.session_id,
            step_id: step.id,
            name: step.display_name().to_owned(),
            attempt: slot.attempt,
            depth: slot.depth,
            hidden: step.hide,
        });
    }

    /// Appends one attempt to the history, persists, then publishes it.
    async fn commit(
        &self,
        state: &mut SessionState,
        slot: Slot,
        step: Step,
        observation: Observation,
        failure: Option<String>,
        status: EntryStatus,
    ) -> Result<()> {
        let session_id = state.session_id;
        let step_id = step.id;
        let event = match &failure {
            None => SessionEvent::AttemptFinished {
                session_id,
                step_id,
                attempt: slot.attempt,
                observation: observation.clone(),
            },
            Some(reason) => {
                warn!(
                    session_id = %session_id,
                    step_id = %step_id,
                    attempt = slot.attempt,
                    depth = slot.depth,
                    status = ?status,
                    "Attempt failed: {reason}"
                );
                SessionEvent::AttemptFailed {
                    session_id,
                    step_id,
                    attempt: slot.attempt,
                    reason: reason.clone(),
                    will_retry: status == EntryStatus::Retrying,
                    status,
                }
            }
        };
        state.commit(HistoryEntry {
            step,
            observation,
            timestamp: Utc::now(),
            depth: slot.depth,
            parent: slot.parent,
            attempt: slot.attempt,
            status,
            failure,
        });
        self.persist(state).await?;
        self.publish(event);
        Ok(())
    }

    /// One attempt: execute (under the step timeout) then validate.
    async fn attempt(&self, state: &mut SessionState, step: &Step, depth: usize) -> Result<Execution> {
        // Composites and input waits are unbounded unless the step sets a limit.
        let waits = matches!(step.kind, StepKind::Composite | StepKind::WaitForInput);
        let limit = step
            .timeout_ms
            .or((!waits).then_some(self.config.step_timeout_ms));
        let execution = match limit {
            Some(limit_ms) => timeout(Duration::from_millis(limit_ms), self.execute(state, step, depth))
                .await
                .map_err(|_elapsed| Error::Timeout(limit_ms))??,
            None => self.execute(state, step, depth).await?,
        };
        if !execution.observation.success {
            return Ok(execution);
        }

        let report = self.validators.validate(step, &execution.observation).await;
        for outcome in &report.outcomes {
            let reason = match &outcome.verdict {
                Verdict::Pass => None,
                Verdict::Fail(reason) => Some(reason.clone()),
            };
            self.publish(SessionEvent::ValidatorVerdict {
                session_id: state.session_id,
                step_id: step.id,
                validator: outcome.validator.clone(),
                passed: reason.is_none(),
                reason,
            });
        }
        match report.failure_reason() {
            Some(reason) => {
                let rejected = Observation {
                    summary: execution.observation.summary.clone(),
                    payload: execution.observation.payload.clone(),
                    ..Observation::from_error(&Error::ValidationFailure(reason))
                };
                Ok(Execution {
                    observation: rejected,
                    ran: execution.ran,
                })
            }
            None => Ok(execution),
        }
    }

    /// Performs the step's action.
    async fn execute(&self, state: &mut SessionState, step: &Step, depth: usize) -> Result<Execution> {
        match step.kind {
            StepKind::Message => {
                let text = step.param_str("text").unwrap_or_default();
                Ok(Execution::leaf(
                    Observation::success(text).with_payload("text", text),
                ))
            }
            StepKind::WaitForInput => {
                let prompt = step.param_str("prompt").unwrap_or_default();
                let input = self.capabilities.input()?.next_input(prompt).await?;
                Ok(Execution::leaf(
                    Observation::success(input.clone()).with_payload("input", input),
                ))
            }
            StepKind::ModelComplete => self.complete(state, step).await.map(Execution::leaf),
            StepKind::EditFile => {
                let path = step.param_str("path").ok_or_else(|| {
                    Error::Configuration("edit_file step requires a 'path' parameter".to_owned())
                })?;
                let instruction = step.param_str("instruction").unwrap_or_default();
                self.capabilities
                    .editor()?
                    .edit_file(Path::new(path), instruction)
                    .await
                    .map(Execution::leaf)
            }
            StepKind::RunValidator => self.run_validator(state, step).await.map(Execution::leaf),
            StepKind::Composite => {
                let mut ran = Vec::new();
                for child in &step.children {
                    let outcome = self.run_step(state, child, depth + 1, Some(step.id)).await?;
                    ran.push(child.clone());
                    match outcome.status {
                        EntryStatus::Succeeded | EntryStatus::Retrying => {}
                        EntryStatus::Cancelled => return Err(Error::Cancelled),
                        EntryStatus::Failed => {
                            let reason = outcome
                                .observation
                                .error
                                .as_ref()
                                .map_or(&outcome.observation.summary, |error| &error.message);
                            let observation = Observation::failure(
                                "Child step failed",
                                format!("{} failed: {reason}", child.display_name()),
                            );
                            return Ok(Execution { observation, ran });
                        }
                    }
                }
                let observation = Observation::success(format!("Completed {} steps", ran.len()))
                    .with_payload("children", ran.len());
                Ok(Execution { observation, ran })
            }
        }
    }

    async fn complete(&self, state: &SessionState, step: &Step) -> Result<Observation> {
        let model = self.capabilities.model()?;
        let prompt = format!(
            "{}{}",
            state.context_items().render_prompt_prefix(),
            step.param_str("prompt").unwrap_or_default()
        );
        let streaming = step.param_bool("streaming").unwrap_or(true);
        let mut stream = model.complete(&prompt, streaming).await?;

        let token_key = TopicKey::tokens(state.session_id);
        let mut completion = String::new();
        let mut ended = false;
        while let Some(chunk) = stream.next().await {
            match chunk? {
                CompletionChunk::Token(text) => {
                    completion.push_str(&text);
                    self.bus.publish(
                        &token_key,
                        SessionEvent::Token {
                            session_id: state.session_id,
                            step_id: step.id,
                            text,
                        },
                    );
                }
                CompletionChunk::End => {
                    ended = true;
                    break;
                }
            }
        }
        if !ended {
            return Err(Error::Capability(format!(
                "{} closed the completion stream without an end signal",
                model.name()
            )));
        }
        Ok(Observation::success(completion.clone())
            .with_payload("completion", completion)
            .with_payload("model", model.name()))
    }

    async fn run_validator(&self, state: &SessionState, step: &Step) -> Result<Observation> {
        let name = step.param_str("validator").ok_or_else(|| {
            Error::Configuration("run_validator step requires a 'validator' parameter".to_owned())
        })?;
        let parameters = step.parameters.get("parameters").cloned().unwrap_or(Value::Null);
        let loader = self.loader.as_ref().ok_or_else(|| {
            Error::Configuration("no plugin loader available for run_validator".to_owned())
        })?;
        let validator = loader.load_validator(name, &parameters)?;
        // Earlier attempts of this step are not targets.
        let target = state
            .history()
            .iter()
            .rev()
            .find(|entry| entry.step.id != step.id)
            .ok_or_else(|| {
                Error::ValidationFailure("there is no committed step to validate".to_owned())
            })?;

        let limit_ms = self.config.validator_timeout_ms;
        let verdict = timeout(
            Duration::from_millis(limit_ms),
            validator.validate(&target.step, &target.observation),
        )
        .await
        .map_err(|_elapsed| Error::Timeout(limit_ms))??;
        match verdict {
            Verdict::Pass => Ok(Observation::success(format!("{name} passed"))
                .with_payload("validator", name)
                .with_payload("target", target.step.id.to_string())),
            Verdict::Fail(reason) => Err(Error::ValidationFailure(reason)),
        }
    }
}
