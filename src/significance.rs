//! Deciding whether a successful payload carries new information.
//!
//! A significant payload resets a task's interval to its base; an
//! insignificant one grows the empty-response streak that drives backoff.
//!
//! Callers may declare a [`SignificanceSchema`] per task. Without one the
//! registry uses [`SignificanceSchema::default_heuristic`], which matches the
//! chat and notification endpoints this scheduler was built for:
//!
//! | key | significant when |
//! |-----|------------------|
//! | `messages` | non-empty array |
//! | `unread_count` | number > 0 |
//! | `typing_users` | non-empty array |
//! | `online_users` | non-empty array |
//! | `success` | exactly `true` |
//!
//! Note the `success` rule: an endpoint that answers `{"success": true}` on
//! every poll is always treated as active and never backs off.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Test applied to one field of an object payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldCheck {
    /// Field is an array with at least one element.
    NonEmptyList,
    /// Field is a number greater than zero. Numeric strings such as `"3"`
    /// count by their parsed value.
    Positive,
    /// Field is the boolean `true`.
    IsTrue,
}

impl FieldCheck {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::NonEmptyList => value.as_array().is_some_and(|items| !items.is_empty()),
            Self::Positive => numeric(value).is_some_and(|n| n > 0.0),
            Self::IsTrue => value.as_bool() == Some(true),
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// One key/check pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub key: String,
    pub check: FieldCheck,
}

impl FieldRule {
    pub fn new(key: impl Into<String>, check: FieldCheck) -> Self {
        Self {
            key: key.into(),
            check,
        }
    }
}

/// A payload is significant when any rule matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignificanceSchema {
    pub rules: Vec<FieldRule>,
}

impl Default for SignificanceSchema {
    fn default() -> Self {
        Self::default_heuristic()
    }
}

impl SignificanceSchema {
    /// The built-in rules used when a task declares nothing.
    pub fn default_heuristic() -> Self {
        Self {
            rules: vec![
                FieldRule::new("messages", FieldCheck::NonEmptyList),
                FieldRule::new("unread_count", FieldCheck::Positive),
                FieldRule::new("typing_users", FieldCheck::NonEmptyList),
                FieldRule::new("online_users", FieldCheck::NonEmptyList),
                FieldRule::new("success", FieldCheck::IsTrue),
            ],
        }
    }

    /// Evaluate the schema against a payload.
    ///
    /// Objects are checked rule by rule. Arrays carry no keys and are never
    /// significant. Scalars and `null` are always significant: there is
    /// nothing to inspect, so they are not allowed to push the task into
    /// backoff.
    pub fn is_significant(&self, payload: &Value) -> bool {
        match payload {
            Value::Object(fields) => self.rules.iter().any(|rule| {
                fields
                    .get(&rule.key)
                    .is_some_and(|value| rule.check.matches(value))
            }),
            Value::Array(_) => false,
            _ => true,
        }
    }
}
