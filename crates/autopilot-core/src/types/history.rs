//! The append-only execution trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Observation, Step, StepId};

/// How a committed attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// The attempt passed execution and validation
    Succeeded,
    /// The attempt failed and another attempt follows
    Retrying,
    /// The attempt failed and no attempts remain
    Failed,
    /// The attempt was interrupted by session cancellation
    Cancelled,
}

/// One committed step attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Snapshot of the step as executed, children included
    pub step: Step,
    /// Observation produced by the attempt
    pub observation: Observation,
    /// When the attempt was committed
    pub timestamp: DateTime<Utc>,
    /// Nesting depth (0 for policy-issued steps)
    pub depth: usize,
    /// Enclosing step for nested attempts
    pub parent: Option<StepId>,
    /// 1-based attempt number
    pub attempt: u32,
    /// Outcome of the attempt
    pub status: EntryStatus,
    /// Failure reason from the capability or validator, if any
    pub failure: Option<String>,
}

impl HistoryEntry {
    /// Whether this entry ends its step (no further attempts follow).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status != EntryStatus::Retrying
    }

    /// Whether the attempt succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == EntryStatus::Succeeded
    }
}

/// Ordered, append-only sequence of committed attempts.
///
/// There is no API to remove or reorder entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry, returning its index.
    pub fn append(&mut self, entry: HistoryEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    /// Number of committed attempts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been committed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in commit order.
    #[must_use]
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Iterates entries in commit order.
    pub fn iter(&self) -> core::slice::Iter<'_, HistoryEntry> {
        self.entries.iter()
    }

    /// Most recent entry.
    #[must_use]
    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    /// Top-level entries (depth 0).
    pub fn top_level(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().filter(|entry| entry.depth == 0)
    }

    /// Terminal entry for `step_id`, if the step has finished.
    #[must_use]
    pub fn terminal_entry(&self, step_id: StepId) -> Option<&HistoryEntry> {
        self.entries
            .iter()
            .find(|entry| entry.step.id == step_id && entry.is_terminal())
    }

    /// Whether `step_id` has finished (successfully or not).
    #[must_use]
    pub fn is_finished(&self, step_id: StepId) -> bool {
        self.terminal_entry(step_id).is_some()
    }

    /// Number of attempts committed for `step_id`.
    #[must_use]
    pub fn attempts_of(&self, step_id: StepId) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.step.id == step_id)
            .count()
    }

    /// Whether `self` is an unchanged prefix of `other`.
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.entries.len() <= other.entries.len()
            && self
                .entries
                .iter()
                .zip(&other.entries)
                .all(|(mine, theirs)| mine == theirs)
    }
}

impl<'history> IntoIterator for &'history History {
    type Item = &'history HistoryEntry;
    type IntoIter = core::slice::Iter<'history, HistoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(step: &Step, attempt: u32, status: EntryStatus) -> HistoryEntry {
        HistoryEntry {
            step: step.clone(),
            observation: Observation::success("ok"),
            timestamp: Utc::now(),
            depth: 0,
            parent: None,
            attempt,
            status,
            failure: None,
        }
    }

    #[test]
    fn test_terminal_entry_skips_retries() {
        let step = Step::message("hi");
        let mut history = History::new();
        history.append(entry(&step, 1, EntryStatus::Retrying));
        assert!(!history.is_finished(step.id));

        history.append(entry(&step, 2, EntryStatus::Failed));
        assert_eq!(history.attempts_of(step.id), 2);
        assert_eq!(
            history.terminal_entry(step.id).map(|found| found.attempt),
            Some(2)
        );
    }

    #[test]
    fn test_prefix_detection() {
        let step = Step::message("hi");
        let mut before = History::new();
        before.append(entry(&step, 1, EntryStatus::Succeeded));
        let mut after = before.clone();
        after.append(entry(&Step::message("next"), 1, EntryStatus::Succeeded));

        assert!(before.is_prefix_of(&after));
        assert!(!after.is_prefix_of(&before));
    }
}
