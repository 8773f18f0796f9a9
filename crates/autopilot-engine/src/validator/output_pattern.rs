use async_trait::async_trait;
use autopilot_core::{Error, Observation, Result, Step, StepKind};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, from_value};

use super::{Validator, Verdict, applies_to_kinds};

/// Markers that flag an observation as failed when no pattern is configured.
const ERROR_MARKERS: [&str; 3] = ["error:", "panicked at", "Traceback (most recent call last)"];

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct OutputPatternParams {
    pattern: Option<String>,
    field: Option<String>,
    forbid: bool,
    kinds: Option<Vec<StepKind>>,
}

/// Checks observation text against a regular expression.
///
/// Without a pattern it rejects failed observations and text containing common
/// error markers. With `forbid` the pattern must be absent instead of present.
#[derive(Debug)]
pub struct OutputPatternValidator {
    pattern: Option<Regex>,
    field: Option<String>,
    forbid: bool,
    kinds: Option<Vec<StepKind>>,
}

impl OutputPatternValidator {
    /// Builds the validator from plugin parameters.
    ///
    /// # Errors
    /// Returns a configuration error for unknown keys or an invalid pattern.
    pub fn from_parameters(parameters: &Value) -> Result<Self> {
        let params: OutputPatternParams = if parameters.is_null() {
            OutputPatternParams::default()
        } else {
            from_value(parameters.clone()).map_err(|error| {
                Error::Configuration(format!("output_pattern parameters: {error}"))
            })?
        };
        let pattern = params
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|error| Error::Configuration(format!("output_pattern regex: {error}")))?;
        Ok(Self {
            pattern,
            field: params.field,
            forbid: params.forbid,
            kinds: params.kinds,
        })
    }

    fn subject<'obs>(&self, observation: &'obs Observation) -> Option<&'obs str> {
        match &self.field {
            Some(field) => observation.payload_str(field),
            None => Some(observation.summary.as_str()),
        }
    }
}

#[async_trait]
impl Validator for OutputPatternValidator {
    fn name(&self) -> &str {
        "output_pattern"
    }

    fn applies_to(&self, step: &Step) -> bool {
        applies_to_kinds(self.kinds.as_deref(), step)
    }

    async fn validate(&self, _step: &Step, observation: &Observation) -> Result<Verdict> {
        if let Some(error) = &observation.error {
            return Ok(Verdict::Fail(format!("{}: {}", error.title, error.message)));
        }
        let Some(text) = self.subject(observation) else {
            return Ok(Verdict::Fail(format!(
                "payload field '{}' is missing",
                self.field.as_deref().unwrap_or_default()
            )));
        };

        let Some(pattern) = &self.pattern else {
            return Ok(ERROR_MARKERS
                .iter()
                .find(|marker| text.contains(*marker))
                .map_or(Verdict::Pass, |marker| {
                    Verdict::Fail(format!("output contains error marker '{marker}'"))
                }));
        };

        let found = pattern.is_match(text);
        Ok(match (found, self.forbid) {
            (true, false) | (false, true) => Verdict::Pass,
            (false, false) => Verdict::Fail(format!("output does not match /{pattern}/")),
            (true, true) => Verdict::Fail(format!("output matches forbidden /{pattern}/")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator(parameters: &Value) -> OutputPatternValidator {
        match OutputPatternValidator::from_parameters(parameters) {
            Ok(validator) => validator,
            Err(error) => panic!("invalid parameters: {error}"),
        }
    }

    async fn verdict(validator: &OutputPatternValidator, observation: &Observation) -> Verdict {
        match validator.validate(&Step::message("x"), observation).await {
            Ok(verdict) => verdict,
            Err(error) => panic!("validate failed: {error}"),
        }
    }

    #[tokio::test]
    async fn test_pattern_on_payload_field() {
        let check = validator(&json!({ "pattern": "^fn \\w+", "field": "completion" }));
        let good = Observation::success("done").with_payload("completion", "fn main() {}");
        let bad = Observation::success("done").with_payload("completion", "let x = 1;");
        assert_eq!(verdict(&check, &good).await, Verdict::Pass);
        assert!(!verdict(&check, &bad).await.is_pass());
        assert!(!verdict(&check, &Observation::success("no payload")).await.is_pass());
    }

    #[tokio::test]
    async fn test_forbid_inverts_the_match() {
        let check = validator(&json!({ "pattern": "TODO", "forbid": true }));
        assert_eq!(verdict(&check, &Observation::success("clean")).await, Verdict::Pass);
        assert!(!verdict(&check, &Observation::success("TODO: fix")).await.is_pass());
    }

    #[tokio::test]
    async fn test_default_rejects_error_markers_and_failures() {
        let check = validator(&Value::Null);
        assert_eq!(verdict(&check, &Observation::success("all good")).await, Verdict::Pass);
        assert!(!verdict(&check, &Observation::success("error: boom")).await.is_pass());
        assert!(!verdict(&check, &Observation::failure("Capability error", "x")).await.is_pass());
    }

    #[test]
    fn test_kind_filter_and_bad_parameters() {
        let check = validator(&json!({ "kinds": ["model_complete"] }));
        assert!(check.applies_to(&Step::model_complete("hi")));
        assert!(!check.applies_to(&Step::message("hi")));

        assert!(matches!(
            OutputPatternValidator::from_parameters(&json!({ "pattern": "(" })),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            OutputPatternValidator::from_parameters(&json!({ "bogus": 1 })),
            Err(Error::Configuration(_))
        ));
    }
}
