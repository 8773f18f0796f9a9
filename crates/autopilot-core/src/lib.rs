//! Core types and traits for the autopilot step engine.
//!
//! This crate provides the step and history data model, error handling,
//! configuration, and the capability traits the engine depends on.

/// Configuration loading and plugin wiring.
pub mod config;
/// Error types and result definitions.
pub mod error;
/// Capability traits implemented by collaborators.
pub mod traits;
/// Steps, observations, history, context, and sessions.
pub mod types;

pub use config::{AutopilotConfig, PluginKind, PluginSpec, SessionConfig};
pub use error::{Error, Result};
pub use traits::{CompletionChunk, ContextProvider, Editor, LanguageModel, TokenStream, UserInput};
pub use types::{
    ContextItem, ContextItemId, ContextItems, EntryStatus, History, HistoryEntry, Observation,
    ObservationError, Parameters, SessionId, SessionStatus, SessionSummary, Step, StepId,
    StepKind,
};
