use async_trait::async_trait;
use autopilot_core::{History, Result, Step};
use serde_json::Value;

use super::{Policy, array_param, step_from_config};

const ID_SALT: u64 = 0x5e9_0000;

/// Follows a fixed plan by position.
///
/// A plan step is done once it has a terminal entry, whether it succeeded or
/// not; the plan carries on either way.
#[derive(Debug, Clone)]
pub struct SequentialPolicy {
    steps: Vec<Step>,
}

impl SequentialPolicy {
    /// Policy running `steps` in order.
    #[must_use]
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Builds the policy from `{steps: [Step]}`.
    ///
    /// # Errors
    /// Returns a configuration error if a step cannot be parsed.
    pub fn from_parameters(parameters: &Value) -> Result<Self> {
        let steps = array_param(parameters, "steps", "sequential")?
            .iter()
            .zip(0_u64..)
            .map(|(value, index)| step_from_config(value, ID_SALT, index))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(steps))
    }

    /// Planned steps.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

#[async_trait]
impl Policy for SequentialPolicy {
    fn name(&self) -> &str {
        "sequential"
    }

    async fn next(&self, history: &History) -> Option<Step> {
        self.steps
            .iter()
            .find(|step| !history.is_finished(step.id))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::{EntryStatus, HistoryEntry, Observation};
    use chrono::Utc;
    use serde_json::json;

    fn commit(history: &mut History, step: &Step, status: EntryStatus) {
        history.append(HistoryEntry {
            step: step.clone(),
            observation: Observation::success("ok"),
            timestamp: Utc::now(),
            depth: 0,
            parent: None,
            attempt: 1,
            status,
            failure: None,
        });
    }

    #[tokio::test]
    async fn test_follows_plan_regardless_of_outcome() {
        let first = Step::message("one");
        let second = Step::message("two");
        let policy = SequentialPolicy::new(vec![first.clone(), second.clone()]);
        let mut history = History::new();

        assert_eq!(policy.next(&history).await.map(|step| step.id), Some(first.id));
        commit(&mut history, &first, EntryStatus::Retrying);
        assert_eq!(policy.next(&history).await.map(|step| step.id), Some(first.id));
        commit(&mut history, &first, EntryStatus::Failed);
        assert_eq!(policy.next(&history).await.map(|step| step.id), Some(second.id));
        commit(&mut history, &second, EntryStatus::Succeeded);
        assert!(policy.next(&history).await.is_none());
        assert!(policy.succeeded(&history));
    }

    #[test]
    fn test_configured_ids_are_reproducible() {
        let parameters = json!({ "steps": [
            { "kind": "message", "parameters": { "text": "a" } },
            { "kind": "message", "parameters": { "text": "b" } }
        ] });
        let (Ok(first), Ok(second)) = (
            SequentialPolicy::from_parameters(&parameters),
            SequentialPolicy::from_parameters(&parameters),
        ) else {
            panic!("parameters should parse");
        };
        let first_ids: Vec<_> = first.steps().iter().map(|step| step.id).collect();
        let second_ids: Vec<_> = second.steps().iter().map(|step| step.id).collect();
        assert_eq!(first_ids, second_ids);
        assert_ne!(first_ids[0], first_ids[1]);
    }

    #[test]
    fn test_steps_must_be_an_array() {
        assert!(SequentialPolicy::from_parameters(&json!({ "steps": "nope" })).is_err());
        assert!(matches!(
            SequentialPolicy::from_parameters(&Value::Null),
            Ok(policy) if policy.steps().is_empty()
        ));
    }
}
