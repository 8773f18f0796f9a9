//! Decision policies choosing the next step from the history.

use async_trait::async_trait;
use autopilot_core::{Error, History, Result, Step, StepId};
use serde_json::{Value, from_value};

mod depth_first;
mod random;
mod sequential;

pub use depth_first::{DepthFirstSearchPolicy, SearchNode};
pub use random::RandomExplorationPolicy;
pub use sequential::SequentialPolicy;

/// Chooses the next step given the trace so far.
///
/// Implementations must return the same answer for the same history so a
/// reloaded session continues where it stopped.
#[async_trait]
pub trait Policy: Send + Sync {
    /// Registered name.
    fn name(&self) -> &str;

    /// Next step to run, or `None` when the policy is done.
    async fn next(&self, history: &History) -> Option<Step>;

    /// Whether the finished session counts as a success.
    ///
    /// Defaults to "the last top-level step succeeded".
    fn succeeded(&self, history: &History) -> bool {
        history
            .top_level()
            .filter(|entry| entry.is_terminal())
            .last()
            .is_some_and(|entry| entry.succeeded())
    }
}

/// Reproducible id for a configured step that did not specify one.
///
/// `salt` separates the id spaces of different policies; `index` is the
/// step's position within its policy.
pub(crate) const fn plan_step_id(salt: u64, index: u64) -> StepId {
    StepId::from_u128(((salt as u128) << 64) | index as u128)
}

/// Deserializes a step from plugin parameters, assigning a reproducible id
/// when the configuration leaves it out.
pub(crate) fn step_from_config(value: &Value, salt: u64, index: u64) -> Result<Step> {
    let has_id = value.get("id").is_some();
    let step: Step = from_value(value.clone())
        .map_err(|error| Error::Configuration(format!("invalid step #{index}: {error}")))?;
    Ok(if has_id {
        step
    } else {
        step.with_id(plan_step_id(salt, index))
    })
}

/// Array parameter `key`, defaulting to empty when absent.
pub(crate) fn array_param<'value>(
    parameters: &'value Value,
    key: &str,
    policy: &str,
) -> Result<&'value [Value]> {
    match parameters.get(key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(values)) => Ok(values),
        Some(_) => Err(Error::Configuration(format!(
            "{policy}: '{key}' must be an array"
        ))),
    }
}
