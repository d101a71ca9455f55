use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::failure::{Outcome, Payload};

type Predicate = dyn Fn(&Outcome, &[String]) -> bool + Send + Sync;
type Resolver = dyn Fn(&Outcome) -> Payload + Send + Sync;

/// One named case of a matcher: when it applies and what its handler gets.
#[derive(Clone)]
pub struct MatchCase {
    predicate: Arc<Predicate>,
    resolver: Arc<Resolver>,
}

impl MatchCase {
    pub fn new<P, F>(predicate: P, resolver: F) -> Self
    where
        P: Fn(&Outcome, &[String]) -> bool + Send + Sync + 'static,
        F: Fn(&Outcome) -> Payload + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            resolver: Arc::new(resolver),
        }
    }

    pub fn success() -> Self {
        Self::new(|outcome, _| outcome.is_ok(), resolve)
    }

    /// Matches failures, optionally only those of the named steps, and
    /// resolves to the failure payload.
    pub fn failure() -> Self {
        Self::new(
            |outcome, steps| match outcome {
                Err(failure) => steps.is_empty() || steps.iter().any(|s| failure == s.as_str()),
                Ok(_) => false,
            },
            resolve,
        )
    }

    /// Like [`failure`](Self::failure) but the patterns are the `failure`
    /// labels declared on steps rather than step names.
    pub fn failure_labelled() -> Self {
        Self::new(
            |outcome, labels| match outcome {
                Err(failure) => {
                    labels.is_empty()
                        || failure
                            .step()
                            .failure_label
                            .as_ref()
                            .is_some_and(|label| labels.contains(label))
                }
                Ok(_) => false,
            },
            resolve,
        )
    }

    pub fn matches(&self, outcome: &Outcome, patterns: &[String]) -> bool {
        (self.predicate)(outcome, patterns)
    }

    pub fn resolve(&self, outcome: &Outcome) -> Payload {
        (self.resolver)(outcome)
    }
}

fn resolve(outcome: &Outcome) -> Payload {
    match outcome {
        Ok(value) => Payload::Value(value.clone()),
        Err(failure) => failure.value().clone(),
    }
}

impl fmt::Debug for MatchCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MatchCase")
    }
}

/// Named match cases. The default table has `success` and `failure`.
#[derive(Clone)]
pub struct MatcherTable {
    cases: HashMap<String, MatchCase>,
}

impl Default for MatcherTable {
    fn default() -> Self {
        Self::empty()
            .case("success", MatchCase::success())
            .case("failure", MatchCase::failure())
    }
}

impl MatcherTable {
    pub fn empty() -> Self {
        Self {
            cases: HashMap::new(),
        }
    }

    pub fn case(mut self, name: impl Into<String>, case: MatchCase) -> Self {
        self.cases.insert(name.into(), case);
        self
    }

    pub fn get(&self, name: &str) -> Option<&MatchCase> {
        self.cases.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.cases.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Collects handlers through `handlers` and runs the first whose case
    /// matches `outcome`. Returns `None` when no handler applies.
    pub fn evaluate<'h, R, F>(&self, outcome: &Outcome, handlers: F) -> Result<Option<R>>
    where
        F: FnOnce(&mut Match<'h, R>),
    {
        let mut matcher = Match { arms: Vec::new() };
        handlers(&mut matcher);

        let mut cases = Vec::with_capacity(matcher.arms.len());
        for arm in &matcher.arms {
            let case = self
                .get(&arm.case)
                .ok_or_else(|| Error::UnknownMatchCase(arm.case.clone()))?;
            cases.push(case.clone());
        }

        for (arm, case) in matcher.arms.into_iter().zip(cases) {
            if case.matches(outcome, &arm.patterns) {
                return Ok(Some((arm.handler)(case.resolve(outcome))));
            }
        }
        Ok(None)
    }
}

impl fmt::Debug for MatcherTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatcherTable")
            .field("cases", &self.names())
            .finish()
    }
}

struct Arm<'h, R> {
    case: String,
    patterns: Vec<String>,
    handler: Box<dyn FnOnce(Payload) -> R + 'h>,
}

/// Handler registrations for one outcome; tried in declaration order.
pub struct Match<'h, R> {
    arms: Vec<Arm<'h, R>>,
}

impl<'h, R> Match<'h, R> {
    pub fn on<I, S, F>(&mut self, case: &str, patterns: I, handler: F) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce(Payload) -> R + 'h,
    {
        self.arms.push(Arm {
            case: case.to_string(),
            patterns: patterns.into_iter().map(Into::into).collect(),
            handler: Box::new(handler),
        });
        self
    }

    pub fn success<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnOnce(Value) -> R + 'h,
    {
        self.on("success", Vec::<String>::new(), move |payload: Payload| {
            handler(payload.to_json())
        })
    }

    pub fn failure<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnOnce(Payload) -> R + 'h,
    {
        self.on("failure", Vec::<String>::new(), handler)
    }

    pub fn failure_of<I, S, F>(&mut self, steps: I, handler: F) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce(Payload) -> R + 'h,
    {
        self.on("failure", steps, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::{StepFailure, StepIdentity};
    use serde_json::json;

    fn failed(step: &str, label: Option<&str>) -> Outcome {
        let identity = StepIdentity {
            name: step.to_string(),
            operation_name: step.to_string(),
            adapter: "step".to_string(),
            failure_label: label.map(str::to_string),
        };
        Err(StepFailure::tag(Arc::new(identity), json!("email required").into()))
    }

    #[test]
    fn first_matching_failure_handler_wins() {
        let outcome = failed("validate", None);
        let result = MatcherTable::default()
            .evaluate(&outcome, |m| {
                m.success(|_| "success".to_string());
                m.failure_of(["persist"], |_| "persist".to_string());
                m.failure_of(["step", "validate"], |v| format!("validation: {v}"));
                m.failure(|_| "catch-all".to_string());
            })
            .unwrap();
        assert_eq!(result.as_deref(), Some("validation: \"email required\""));
    }

    #[test]
    fn unmatched_step_without_catch_all_gives_nothing() {
        let outcome = failed("validate", None);
        let result: Option<()> = MatcherTable::default()
            .evaluate(&outcome, |m| {
                m.failure_of(["persist"], |_| ());
            })
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn unknown_case_is_an_error() {
        let outcome: Outcome = Ok(json!(1));
        let err = MatcherTable::default()
            .evaluate(&outcome, |m: &mut Match<'_, ()>| {
                m.on("yep", Vec::<String>::new(), |_| ());
            })
            .unwrap_err();
        assert!(matches!(err, Error::UnknownMatchCase(name) if name == "yep"));
    }

    #[test]
    fn labelled_failure_case_uses_step_label() {
        let table = MatcherTable::empty().case("nup", MatchCase::failure_labelled());
        let outcome = failed("validate", Some("bad_value"));
        let hit = table
            .evaluate(&outcome, |m| {
                m.on("nup", ["other"], |_| 1);
                m.on("nup", ["bad_value"], |_| 2);
            })
            .unwrap();
        assert_eq!(hit, Some(2));
    }
}
