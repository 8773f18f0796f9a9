use std::path::PathBuf;

use autopilot_core::{
    ContextItem, ContextItemId, ContextItems, Error, History, HistoryEntry, Result, SessionId,
    SessionStatus, SessionSummary,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default title for new sessions.
pub const DEFAULT_TITLE: &str = "New Session";

/// Persisted aggregate of one session's trace and context.
///
/// Only the engine appends to the history; callers get snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Stable identifier, also the key of the persisted record
    pub session_id: SessionId,
    /// Display title
    pub title: String,
    /// Workspace the session operates on
    pub workspace_root: PathBuf,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Lifecycle status
    status: SessionStatus,
    /// Append-only execution trace
    history: History,
    /// Ordered context items
    context_items: ContextItems,
}

impl SessionState {
    /// Fresh session for `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: PathBuf) -> Self {
        Self::with_id(SessionId::new(), workspace_root)
    }

    /// Fresh session with a caller-chosen id.
    #[must_use]
    pub fn with_id(session_id: SessionId, workspace_root: PathBuf) -> Self {
        Self {
            session_id,
            title: DEFAULT_TITLE.to_owned(),
            workspace_root,
            created_at: Utc::now(),
            status: SessionStatus::Created,
            history: History::new(),
            context_items: ContextItems::new(),
        }
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> SessionStatus {
        self.status
    }

    /// Execution trace.
    #[must_use]
    pub const fn history(&self) -> &History {
        &self.history
    }

    /// Context items in insertion order.
    #[must_use]
    pub const fn context_items(&self) -> &ContextItems {
        &self.context_items
    }

    /// Number of committed attempts, nested ones included.
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.history.len()
    }

    /// Listing summary.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id,
            title: self.title.clone(),
            workspace_root: self.workspace_root.clone(),
            created_at: self.created_at,
            status: self.status,
        }
    }

    /// Appends a committed attempt.
    pub(crate) fn commit(&mut self, entry: HistoryEntry) -> usize {
        self.history.append(entry)
    }

    /// Moves the session into `Running`.
    ///
    /// # Errors
    /// Returns an error if the session already reached a terminal status.
    pub(crate) fn mark_running(&mut self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::Other(format!(
                "Session {} already finished with status {:?}",
                self.session_id, self.status
            )));
        }
        self.status = SessionStatus::Running;
        Ok(())
    }

    /// Records the terminal status. Later calls keep the first terminal status.
    pub(crate) fn finish(&mut self, status: SessionStatus) {
        if !self.status.is_terminal() {
            self.status = status;
        }
    }

    /// Inserts (or replaces) a context item.
    pub fn add_context_item(&mut self, item: ContextItem) {
        self.context_items.insert(item);
    }

    /// Removes a context item.
    pub fn remove_context_item(&mut self, id: &ContextItemId) -> Option<ContextItem> {
        self.context_items.remove(id)
    }

    /// Edits an editable context item.
    ///
    /// # Errors
    /// Returns an error if the item is missing or not editable.
    pub fn edit_context_item(&mut self, id: &ContextItemId, content: &str) -> Result<()> {
        self.context_items.edit(id, content)
    }

    /// Removes every context item.
    pub fn clear_context(&mut self) {
        self.context_items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_defaults() {
        let state = SessionState::new(PathBuf::from("/workspace"));
        assert_eq!(state.title, DEFAULT_TITLE);
        assert_eq!(state.status(), SessionStatus::Created);
        assert!(state.history().is_empty());
        assert_eq!(state.summary().workspace_root, PathBuf::from("/workspace"));
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let mut state = SessionState::new(PathBuf::from("."));
        assert!(state.mark_running().is_ok());
        state.finish(SessionStatus::Cancelled);
        state.finish(SessionStatus::Succeeded);
        assert_eq!(state.status(), SessionStatus::Cancelled);
        assert!(state.mark_running().is_err());
    }
}
