//! Session status and listing summaries.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SessionId;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created but not yet started
    Created,
    /// The engine is executing steps
    Running,
    /// The policy's success predicate held when execution ended
    Succeeded,
    /// Execution ended without success
    Failed,
    /// The session was cancelled
    Cancelled,
    /// The step budget ran out before the policy finished
    BudgetExhausted,
}

impl SessionStatus {
    /// Whether the session has finished executing.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::BudgetExhausted
        )
    }
}

/// Lightweight description of a persisted session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session identifier
    pub session_id: SessionId,
    /// Session title
    pub title: String,
    /// Workspace the session operates on
    pub workspace_root: PathBuf,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Status when last persisted
    pub status: SessionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!SessionStatus::Created.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
        assert!(SessionStatus::Succeeded.is_terminal());
        assert!(SessionStatus::BudgetExhausted.is_terminal());
    }
}
