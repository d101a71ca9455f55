//! Failure payloads and step-tagged failures.
//!
//! A step that fails produces a [`Payload`]; the step then tags it with its
//! own identity, producing the [`StepFailure`] the sequence returns.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Value produced by a step adapter: success value or failing payload.
pub type StepOutcome = Result<Value, Payload>;

/// Value produced by a whole sequence.
pub type Outcome = Result<Value, StepFailure>;

/// What a step failed with.
#[derive(Debug, Clone)]
pub enum Payload {
    /// A plain failing value, e.g. the input a check step rejected.
    Value(Value),
    /// An error captured by a `try` step.
    Error(Arc<anyhow::Error>),
    /// A failure already tagged by an inner step (seen by around steps).
    Nested(Box<StepFailure>),
}

impl Payload {
    pub fn error(err: impl Into<anyhow::Error>) -> Self {
        Payload::Error(Arc::new(err.into()))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Payload::Value(value) => Some(value),
            Payload::Nested(inner) => inner.value().as_value(),
            Payload::Error(_) => None,
        }
    }

    pub fn as_error(&self) -> Option<&anyhow::Error> {
        match self {
            Payload::Error(err) => Some(err.as_ref()),
            Payload::Nested(inner) => inner.value().as_error(),
            Payload::Value(_) => None,
        }
    }

    /// Returns `true` when the payload is an error of type `E`.
    pub fn is_error<E>(&self) -> bool
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.as_error().is_some_and(|err| err.is::<E>())
    }

    /// Renders the payload as JSON; errors become their display string.
    pub fn to_json(&self) -> Value {
        match self {
            Payload::Value(value) => value.clone(),
            Payload::Error(err) => Value::String(err.to_string()),
            Payload::Nested(inner) => inner.value().to_json(),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Value(value)
    }
}

impl From<StepFailure> for Payload {
    fn from(failure: StepFailure) -> Self {
        Payload::Nested(Box::new(failure))
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Payload::Value(a), Payload::Value(b)) => a == b,
            (Payload::Error(a), Payload::Error(b)) => Arc::ptr_eq(a, b),
            (Payload::Nested(a), Payload::Nested(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq<Value> for Payload {
    fn eq(&self, other: &Value) -> bool {
        self.as_value() == Some(other)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Value(value) => write!(f, "{value}"),
            Payload::Error(err) => write!(f, "{err}"),
            Payload::Nested(inner) => write!(f, "{inner}"),
        }
    }
}

/// Identity of the step that produced a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepIdentity {
    pub name: String,
    pub operation_name: String,
    pub adapter: String,
    /// Free-form label declared on the step, used by custom matchers.
    pub failure_label: Option<String>,
}

/// A failing payload tagged with the step that produced it.
///
/// Compares equal to a step name (`failure == "validate"`) when the tag
/// matches, and to a JSON value when the wrapped payload equals it.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    step: Arc<StepIdentity>,
    value: Payload,
}

impl StepFailure {
    /// Tags `payload` with `step`. A payload that already carries a
    /// `StepFailure` keeps its original tag.
    pub fn tag(step: Arc<StepIdentity>, payload: Payload) -> Self {
        match payload {
            Payload::Nested(inner) => *inner,
            value => Self { step, value },
        }
    }

    pub fn step(&self) -> &StepIdentity {
        &self.step
    }

    pub fn step_name(&self) -> &str {
        &self.step.name
    }

    pub fn value(&self) -> &Payload {
        &self.value
    }

    pub fn into_value(self) -> Payload {
        self.value
    }
}

impl PartialEq<str> for StepFailure {
    fn eq(&self, other: &str) -> bool {
        self.step.name == other
    }
}

impl PartialEq<&str> for StepFailure {
    fn eq(&self, other: &&str) -> bool {
        self.step.name == *other
    }
}

impl PartialEq<Value> for StepFailure {
    fn eq(&self, other: &Value) -> bool {
        self.value == *other
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step `{}` failed: {}", self.step.name, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity(name: &str) -> Arc<StepIdentity> {
        Arc::new(StepIdentity {
            name: name.to_string(),
            operation_name: name.to_string(),
            adapter: "step".to_string(),
            failure_label: None,
        })
    }

    #[test]
    fn compares_against_name_and_value() {
        let failure = StepFailure::tag(identity("validate"), Payload::Value(json!("no email")));
        assert!(failure == "validate");
        assert!(failure == json!("no email"));
        assert!(failure != "other_name");
        assert!(failure != json!("something else"));
    }

    #[test]
    fn nested_payload_keeps_inner_tag() {
        let inner = StepFailure::tag(identity("validate"), Payload::Value(json!(1)));
        let outer = StepFailure::tag(identity("transaction"), inner.clone().into());
        assert_eq!(outer, inner);
        assert_eq!(outer.step_name(), "validate");
    }
}
