//! Data model shared by the engine and its plugins.

mod context;
mod history;
mod ids;
mod observation;
mod session;
mod step;

pub use context::{ContextItem, ContextItemId, ContextItems};
pub use history::{EntryStatus, History, HistoryEntry};
pub use ids::{SessionId, StepId};
pub use observation::{Observation, ObservationError};
pub use session::{SessionStatus, SessionSummary};
pub use step::{Parameters, Step, StepKind};
