use autopilot_core::{EntryStatus, Observation, SessionId, SessionStatus, StepId};
use serde::{Deserialize, Serialize};

use super::SubscriptionBus;

/// Stream a session publishes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Attempt boundaries, verdicts, context changes, and session completion
    Lifecycle,
    /// Streamed model tokens
    Tokens,
}

impl Topic {
    /// Every topic a session publishes on.
    pub const ALL: [Self; 2] = [Self::Lifecycle, Self::Tokens];
}

/// Bus key: one topic of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicKey {
    /// Owning session
    pub session_id: SessionId,
    /// Topic within the session
    pub topic: Topic,
}

impl TopicKey {
    /// Lifecycle topic of `session_id`.
    #[must_use]
    pub const fn lifecycle(session_id: SessionId) -> Self {
        Self {
            session_id,
            topic: Topic::Lifecycle,
        }
    }

    /// Token topic of `session_id`.
    #[must_use]
    pub const fn tokens(session_id: SessionId) -> Self {
        Self {
            session_id,
            topic: Topic::Tokens,
        }
    }
}

/// Bus carrying session events.
pub type EventBus = SubscriptionBus<TopicKey, SessionEvent>;

/// Progress events published while a session runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The engine loop started (or resumed)
    SessionStarted {
        /// Session
        session_id: SessionId,
        /// Number of entries already in history
        history_len: usize,
    },
    /// A step attempt started
    AttemptStarted {
        /// Session
        session_id: SessionId,
        /// Step being attempted
        step_id: StepId,
        /// Step display name
        name: String,
        /// 1-based attempt number
        attempt: u32,
        /// Nesting depth
        depth: usize,
        /// Whether observers should hide the step
        hidden: bool,
    },
    /// A streamed model token
    Token {
        /// Session
        session_id: SessionId,
        /// Step producing the token
        step_id: StepId,
        /// Token text
        text: String,
    },
    /// An attempt was committed successfully
    AttemptFinished {
        /// Session
        session_id: SessionId,
        /// Step
        step_id: StepId,
        /// Attempt number
        attempt: u32,
        /// Observation committed for the attempt
        observation: Observation,
    },
    /// An attempt failed
    AttemptFailed {
        /// Session
        session_id: SessionId,
        /// Step
        step_id: StepId,
        /// Attempt number
        attempt: u32,
        /// Why the attempt failed
        reason: String,
        /// Whether another attempt follows
        will_retry: bool,
        /// Committed status of the attempt
        status: EntryStatus,
    },
    /// A validator produced a verdict
    ValidatorVerdict {
        /// Session
        session_id: SessionId,
        /// Step that was validated
        step_id: StepId,
        /// Validator name
        validator: String,
        /// Whether it passed
        passed: bool,
        /// Failure reason, if any
        reason: Option<String>,
    },
    /// Context items changed
    ContextUpdated {
        /// Session
        session_id: SessionId,
        /// Number of items after the change
        item_count: usize,
    },
    /// The session reached a terminal status
    SessionFinished {
        /// Session
        session_id: SessionId,
        /// Terminal status
        status: SessionStatus,
    },
    /// The session was cancelled; the last event on every topic
    Cancelled {
        /// Session
        session_id: SessionId,
    },
}

impl SessionEvent {
    /// Session the event belongs to.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        match self {
            Self::SessionStarted { session_id, .. }
            | Self::AttemptStarted { session_id, .. }
            | Self::Token { session_id, .. }
            | Self::AttemptFinished { session_id, .. }
            | Self::AttemptFailed { session_id, .. }
            | Self::ValidatorVerdict { session_id, .. }
            | Self::ContextUpdated { session_id, .. }
            | Self::SessionFinished { session_id, .. }
            | Self::Cancelled { session_id } => *session_id,
        }
    }

    /// Topic the event is published on.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        match self {
            Self::Token { .. } => Topic::Tokens,
            _ => Topic::Lifecycle,
        }
    }

    /// Whether this event ends a session's stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionFinished { .. } | Self::Cancelled { .. })
    }
}
