//! Expression evaluation results

use serde::{Deserialize, Serialize};

/// Backend-specific strings that mark a value as unavailable.
///
/// Matching is by substring against the value text the backend returned.
#[derive(Debug, Clone, Copy)]
pub struct Sentinels {
    pub optimized_away: &'static [&'static str],
    pub irretrievable: &'static [&'static str],
}

/// One expression evaluated at one point in time.
///
/// Unevaluable expressions are data, not errors. The three flags are
/// independent: an optimized-away or irretrievable value still counts as
/// evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluatedExpression {
    pub expression: String,
    pub value: Option<String>,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub error: Option<String>,
    pub could_evaluate: bool,
    pub is_optimized_away: bool,
    pub is_irretrievable: bool,
}

impl EvaluatedExpression {
    /// Classify a value the backend produced.
    ///
    /// `is_valid` is the backend's own verdict on the value; sentinel matches
    /// override a negative verdict.
    pub fn from_value(
        expression: &str,
        value: String,
        type_name: Option<String>,
        is_valid: bool,
        sentinels: &Sentinels,
    ) -> Self {
        let is_optimized_away = contains_any(&value, sentinels.optimized_away);
        let is_irretrievable = contains_any(&value, sentinels.irretrievable);

        Self {
            expression: expression.to_string(),
            value: Some(value),
            type_name,
            error: None,
            could_evaluate: is_valid || is_optimized_away || is_irretrievable,
            is_optimized_away,
            is_irretrievable,
        }
    }

    /// Classify an evaluation the backend rejected.
    ///
    /// Some backends report optimized-out variables as errors, so the error
    /// text goes through the same sentinel check as values.
    pub fn from_error(expression: &str, error: String, sentinels: &Sentinels) -> Self {
        let is_optimized_away = contains_any(&error, sentinels.optimized_away);
        let is_irretrievable = contains_any(&error, sentinels.irretrievable);

        Self {
            expression: expression.to_string(),
            value: None,
            type_name: None,
            error: Some(error),
            could_evaluate: is_optimized_away || is_irretrievable,
            is_optimized_away,
            is_irretrievable,
        }
    }
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| text.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENTINELS: Sentinels = Sentinels {
        optimized_away: &["<optimized out>"],
        irretrievable: &["<unavailable>", "Cannot access memory"],
    };

    #[test]
    fn test_plain_value() {
        let v = EvaluatedExpression::from_value("x", "42".into(), Some("int".into()), true, &SENTINELS);
        assert!(v.could_evaluate);
        assert!(!v.is_optimized_away);
        assert!(!v.is_irretrievable);
        assert_eq!(v.type_name.as_deref(), Some("int"));
    }

    #[test]
    fn test_optimized_away_counts_as_evaluable() {
        let v = EvaluatedExpression::from_value("y", "<optimized out>".into(), None, false, &SENTINELS);
        assert!(v.could_evaluate);
        assert!(v.is_optimized_away);
        assert!(!v.is_irretrievable);
    }

    #[test]
    fn test_irretrievable_value() {
        let v = EvaluatedExpression::from_value(
            "*p",
            "Cannot access memory at address 0x0".into(),
            None,
            false,
            &SENTINELS,
        );
        assert!(v.could_evaluate);
        assert!(v.is_irretrievable);
        assert!(!v.is_optimized_away);
    }

    #[test]
    fn test_rejected_expression() {
        let v = EvaluatedExpression::from_error("nope", "undeclared identifier 'nope'".into(), &SENTINELS);
        assert!(!v.could_evaluate);
        assert_eq!(v.value, None);
        assert_eq!(v.error.as_deref(), Some("undeclared identifier 'nope'"));
    }

    #[test]
    fn test_rejected_with_sentinel_is_evaluable() {
        let v = EvaluatedExpression::from_error("z", "<optimized out>".into(), &SENTINELS);
        assert!(v.could_evaluate);
        assert!(v.is_optimized_away);
    }
}
