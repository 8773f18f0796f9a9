//! Step-based orchestration engine.
//!
//! A [`StepEngine`] executes steps chosen by a [`Policy`], checks each attempt
//! with a [`ValidatorRegistry`], records everything in the session history, and
//! streams progress over a [`SubscriptionBus`]. The [`SessionManager`] wires
//! these together from configuration through the [`PluginLoader`].
#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        reason = "Test allows"
    )
)]

/// Publish/subscribe channel for live progress.
pub mod bus;
/// Reference capability implementations.
pub mod builtin;
/// The step engine.
pub mod engine;
/// Tracing initialisation.
pub mod logging;
/// Session lifecycle entry point.
pub mod manager;
/// Plugin registries.
pub mod plugins;
/// Decision policies.
pub mod policy;
/// Session state and persistence.
pub mod session;
/// Validators and their registry.
pub mod validator;

pub use bus::{EventBus, SessionEvent, Subscription, SubscriptionBus, Topic, TopicKey};
pub use engine::{Capabilities, Capability, ChannelInput, StepEngine, StepOutcome};
pub use logging::init_tracing;
pub use manager::SessionManager;
pub use plugins::{PluginLoader, ResolvedPlugins};
pub use policy::{
    DepthFirstSearchPolicy, Policy, RandomExplorationPolicy, SearchNode, SequentialPolicy,
};
pub use session::{SessionState, SessionStore};
pub use validator::{
    ExternalCheckValidator, OutputPatternValidator, ValidationReport, Validator,
    ValidatorRegistry, Verdict,
};
