use async_trait::async_trait;
use autopilot_core::{Error, History, Result, Step, StepId};
use rand::rngs::StdRng;
use rand::{Rng as _, RngCore as _, SeedableRng as _};
use serde_json::Value;

use super::{Policy, array_param, step_from_config};

const ID_SALT: u64 = 0x4a4d_0000;

/// Picks uniformly among candidate steps, reproducibly for a given seed.
///
/// The whole pick sequence is drawn up front, so the choice at any point is a
/// function of the seed and the history alone.
#[derive(Debug, Clone)]
pub struct RandomExplorationPolicy {
    seed: u64,
    picks: Vec<Step>,
}

impl RandomExplorationPolicy {
    /// Draws `picks` steps uniformly from `candidates` using `seed`.
    #[must_use]
    pub fn new(candidates: &[Step], seed: u64, picks: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let picks = if candidates.is_empty() {
            Vec::new()
        } else {
            (0..picks)
                .map(|_| {
                    let chosen = &candidates[rng.gen_range(0..candidates.len())];
                    let id_bits = (u128::from(rng.next_u64()) << 64) | u128::from(rng.next_u64());
                    chosen.clone().with_id(StepId::from_u128(id_bits))
                })
                .collect()
        };
        Self { seed, picks }
    }

    /// Builds the policy from `{candidates: [Step], seed: u64, picks: usize}`.
    ///
    /// `seed` defaults to 0 and `picks` to the number of candidates.
    ///
    /// # Errors
    /// Returns a configuration error for malformed parameters.
    pub fn from_parameters(parameters: &Value) -> Result<Self> {
        let candidates = array_param(parameters, "candidates", "random_exploration")?
            .iter()
            .zip(0_u64..)
            .map(|(value, index)| step_from_config(value, ID_SALT, index))
            .collect::<Result<Vec<_>>>()?;
        let seed = match parameters.get("seed") {
            None | Some(Value::Null) => 0,
            Some(value) => value.as_u64().ok_or_else(|| {
                Error::Configuration("random_exploration: 'seed' must be an unsigned integer".to_owned())
            })?,
        };
        let picks = match parameters.get("picks") {
            None | Some(Value::Null) => candidates.len(),
            Some(value) => value
                .as_u64()
                .and_then(|picks| usize::try_from(picks).ok())
                .ok_or_else(|| {
                    Error::Configuration(
                        "random_exploration: 'picks' must be an unsigned integer".to_owned(),
                    )
                })?,
        };
        Ok(Self::new(&candidates, seed, picks))
    }

    /// Seed the picks were drawn with.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// The drawn pick sequence.
    #[must_use]
    pub fn picks(&self) -> &[Step] {
        &self.picks
    }
}

#[async_trait]
impl Policy for RandomExplorationPolicy {
    fn name(&self) -> &str {
        "random_exploration"
    }

    async fn next(&self, history: &History) -> Option<Step> {
        self.picks
            .iter()
            .find(|step| !history.is_finished(step.id))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<Step> {
        ["a", "b", "c", "d"]
            .into_iter()
            .map(|name| Step::message(name).with_name(name))
            .collect()
    }

    fn names(policy: &RandomExplorationPolicy) -> Vec<String> {
        policy.picks().iter().map(|step| step.name.clone()).collect()
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let first = RandomExplorationPolicy::new(&candidates(), 42, 12);
        let second = RandomExplorationPolicy::new(&candidates(), 42, 12);
        assert_eq!(names(&first), names(&second));
        let first_ids: Vec<StepId> = first.picks().iter().map(|step| step.id).collect();
        let second_ids: Vec<StepId> = second.picks().iter().map(|step| step.id).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn test_picks_come_from_candidates() {
        let policy = RandomExplorationPolicy::new(&candidates(), 7, 32);
        assert_eq!(policy.picks().len(), 32);
        assert!(names(&policy).iter().all(|name| ["a", "b", "c", "d"].contains(&name.as_str())));
    }

    #[test]
    fn test_different_seeds_differ() {
        let sequences: Vec<Vec<String>> = (0..8)
            .map(|seed| names(&RandomExplorationPolicy::new(&candidates(), seed, 16)))
            .collect();
        assert!(sequences.iter().any(|sequence| sequence != &sequences[0]));
    }

    #[tokio::test]
    async fn test_empty_candidates_finish_immediately() {
        let policy = RandomExplorationPolicy::new(&[], 1, 5);
        assert!(policy.next(&History::new()).await.is_none());
    }
}
