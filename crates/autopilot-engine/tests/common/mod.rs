//! Test doubles shared by the engine integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use autopilot_core::config::EngineConfig;
use autopilot_core::{
    CompletionChunk, ContextItem, ContextItemId, ContextProvider, LanguageModel, Observation,
    Result, Step, StepKind, TokenStream,
};
use autopilot_engine::{
    Capabilities, Capability, EventBus, SessionEvent, StepEngine, Subscription, Validator,
    ValidatorRegistry, Verdict,
};
use futures::stream;

/// Fails every step it sees, counting calls.
#[derive(Default)]
pub struct AlwaysFail {
    /// Number of validations run
    pub calls: AtomicUsize,
}

#[async_trait]
impl Validator for AlwaysFail {
    fn name(&self) -> &str {
        "always_fail"
    }

    async fn validate(&self, _step: &Step, _observation: &Observation) -> Result<Verdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Verdict::Fail("rejected by always_fail".to_owned()))
    }
}

/// Fails steps with the given name, passes everything else.
pub struct RejectNamed(pub &'static str);

#[async_trait]
impl Validator for RejectNamed {
    fn name(&self) -> &str {
        "reject_named"
    }

    async fn validate(&self, step: &Step, _observation: &Observation) -> Result<Verdict> {
        if step.name == self.0 {
            Ok(Verdict::Fail(format!("{} is rejected", self.0)))
        } else {
            Ok(Verdict::Pass)
        }
    }
}

/// Fails steps of the given kind, passes everything else.
pub struct RejectKind(pub StepKind);

#[async_trait]
impl Validator for RejectKind {
    fn name(&self) -> &str {
        "reject_kind"
    }

    async fn validate(&self, step: &Step, _observation: &Observation) -> Result<Verdict> {
        if step.kind == self.0 {
            Ok(Verdict::Fail(format!("{} is a {:?} step", step.id, step.kind)))
        } else {
            Ok(Verdict::Pass)
        }
    }
}

/// Context provider titled `notes` whose items cannot be edited.
pub struct ReadOnlyNotes;

#[async_trait]
impl ContextProvider for ReadOnlyNotes {
    fn title(&self) -> &str {
        "notes"
    }

    async fn provide(&self, query_id: &str) -> Result<ContextItem> {
        Ok(ContextItem {
            id: ContextItemId::new("notes", query_id)?,
            name: query_id.to_owned(),
            description: String::new(),
            content: format!("pinned note {query_id}"),
            editable: false,
        })
    }
}

/// How a [`ScriptedModel`] answers.
#[derive(Clone, Copy)]
pub enum Script {
    /// Streams the tokens then the end signal
    Tokens(&'static [&'static str]),
    /// Streams the tokens and stops without the end signal
    Truncated(&'static [&'static str]),
    /// Sleeps before answering
    Stall(Duration),
}

/// Language model with a fixed behaviour, counting calls.
pub struct ScriptedModel {
    /// Behaviour on every call
    pub script: Script,
    /// Number of completions requested
    pub calls: AtomicUsize,
}

impl ScriptedModel {
    /// Model following `script`.
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _prompt: &str, _streaming: bool) -> Result<TokenStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let chunks: Vec<Result<CompletionChunk>> = match self.script {
            Script::Tokens(tokens) => tokens
                .iter()
                .map(|token| Ok(CompletionChunk::Token((*token).to_owned())))
                .chain([Ok(CompletionChunk::End)])
                .collect(),
            Script::Truncated(tokens) => tokens
                .iter()
                .map(|token| Ok(CompletionChunk::Token((*token).to_owned())))
                .collect(),
            Script::Stall(delay) => {
                tokio::time::sleep(delay).await;
                vec![Ok(CompletionChunk::End)]
            }
        };
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// Engine config with a small default retry bound.
pub fn engine_config(default_max_attempts: u32) -> EngineConfig {
    EngineConfig {
        default_max_attempts,
        ..EngineConfig::default()
    }
}

/// Engine with the given validators and model on a fresh bus.
pub fn engine(
    config: EngineConfig,
    validators: Vec<Arc<dyn Validator>>,
    model: Option<Arc<dyn LanguageModel>>,
) -> StepEngine {
    let mut capabilities = Capabilities::new();
    if let Some(model) = model {
        capabilities.install(Capability::Model(model));
    }
    StepEngine::new(config, EventBus::new())
        .with_capabilities(capabilities)
        .with_validators(ValidatorRegistry::new(validators))
}

/// Every event already buffered on `subscription`.
pub fn drain(subscription: &mut Subscription<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscription.try_next() {
        events.push(event);
    }
    events
}
