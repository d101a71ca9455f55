use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Result as AnyResult};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::failure::{Outcome, Payload, StepFailure, StepIdentity, StepOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    /// Normalises a signed arity where `-(n + 1)` means "at least `n`".
    pub fn from_signed(arity: i32) -> Self {
        if arity >= 0 {
            Arity::Exact(arity as usize)
        } else {
            Arity::AtLeast((!arity) as usize)
        }
    }

    pub fn required(&self) -> usize {
        match self {
            Arity::Exact(n) | Arity::AtLeast(n) => *n,
        }
    }

    pub fn accepts(&self, supplied: usize) -> bool {
        match self {
            Arity::Exact(n) => supplied == *n,
            Arity::AtLeast(n) => supplied >= *n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "{n}+"),
        }
    }
}

/// What an operation hands back to its adapter.
#[derive(Debug, Clone)]
pub enum Reply {
    /// A plain value; booleans are plain values too.
    Value(Value),
    Outcome(StepOutcome),
}

impl Reply {
    pub fn success(value: impl Into<Value>) -> Self {
        Reply::Outcome(Ok(value.into()))
    }

    pub fn failure(payload: impl Into<Payload>) -> Self {
        Reply::Outcome(Err(payload.into()))
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Value(value)
    }
}

impl From<bool> for Reply {
    fn from(flag: bool) -> Self {
        Reply::Value(Value::Bool(flag))
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Reply::Value(Value::String(text))
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Reply::Value(Value::String(text.to_string()))
    }
}

impl From<StepOutcome> for Reply {
    fn from(outcome: StepOutcome) -> Self {
        Reply::Outcome(outcome)
    }
}

impl From<Outcome> for Reply {
    fn from(outcome: Outcome) -> Self {
        Reply::Outcome(outcome.map_err(Payload::from))
    }
}

/// Continuation handed to around operations: "run the rest of the pipeline".
///
/// Only the first [`proceed`](Next::proceed) runs the remaining steps; any
/// later call returns that first result again, or an error when the first
/// run aborted.
pub struct Next<'a> {
    step: Arc<StepIdentity>,
    rest: &'a mut dyn FnMut(Outcome) -> Result<Outcome>,
    invoked: bool,
    settled: Option<StepOutcome>,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        step: Arc<StepIdentity>,
        rest: &'a mut dyn FnMut(Outcome) -> Result<Outcome>,
    ) -> Self {
        Self {
            step,
            rest,
            invoked: false,
            settled: None,
        }
    }

    pub fn proceed(&mut self, outcome: StepOutcome) -> Result<StepOutcome> {
        if self.invoked {
            log::warn!(
                "continuation of step `{}` invoked more than once; ignoring repeated call",
                self.step.name
            );
            return match &self.settled {
                Some(settled) => Ok(settled.clone()),
                None => Err(Error::InvalidStep {
                    step: self.step.name.clone(),
                    reason: "continuation already invoked".to_string(),
                }),
            };
        }
        self.invoked = true;
        let step = self.step.clone();
        let outcome = outcome.map_err(|payload| StepFailure::tag(step, payload));
        let result = (self.rest)(outcome)?.map_err(Payload::from);
        self.settled = Some(result.clone());
        Ok(result)
    }

    pub fn invoked(&self) -> bool {
        self.invoked
    }
}

pub struct Invocation<'a> {
    args: Vec<Value>,
    next: Option<Next<'a>>,
}

impl<'a> Invocation<'a> {
    pub fn new(args: Vec<Value>) -> Self {
        Self { args, next: None }
    }

    pub fn with_next(args: Vec<Value>, next: Next<'a>) -> Self {
        Self {
            args,
            next: Some(next),
        }
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn into_parts(self) -> (Vec<Value>, Option<Next<'a>>) {
        (self.args, self.next)
    }
}

/// A unit of work a step can wrap.
pub trait Operation: Send + Sync {
    fn call(&self, invocation: Invocation<'_>) -> AnyResult<Reply>;

    fn arity(&self) -> Arity {
        Arity::AtLeast(0)
    }

    /// Whether the operation expects a continuation (around steps).
    fn yields(&self) -> bool {
        false
    }

    /// Companion operation undoing this one in rollback mode.
    fn rollback(&self) -> Option<Arc<dyn Operation>> {
        None
    }
}

impl<F> Operation for F
where
    F: for<'a> Fn(Invocation<'a>) -> AnyResult<Reply> + Send + Sync,
{
    fn call(&self, invocation: Invocation<'_>) -> AnyResult<Reply> {
        (self)(invocation)
    }
}

type PlainFn = dyn Fn(Vec<Value>) -> AnyResult<Reply> + Send + Sync;
type AroundFn = dyn for<'a> Fn(Vec<Value>, &mut Next<'a>) -> AnyResult<Reply> + Send + Sync;

#[derive(Clone)]
enum Body {
    Plain(Arc<PlainFn>),
    Around(Arc<AroundFn>),
}

/// Closure-backed operation with a declared arity.
#[derive(Clone)]
pub struct Callable {
    arity: Arity,
    body: Body,
    rollback: Option<Arc<dyn Operation>>,
}

impl Callable {
    pub fn variadic<F, R>(arity: Arity, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> AnyResult<R> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        Self {
            arity,
            body: Body::Plain(Arc::new(move |args: Vec<Value>| func(args).map(Into::into))),
            rollback: None,
        }
    }

    pub fn nullary<F, R>(func: F) -> Self
    where
        F: Fn() -> AnyResult<R> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        Self::variadic(Arity::Exact(0), move |_| func())
    }

    pub fn unary<F, R>(func: F) -> Self
    where
        F: Fn(Value) -> AnyResult<R> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        Self::variadic(Arity::Exact(1), move |args| {
            let mut args = args.into_iter();
            func(args.next().unwrap_or(Value::Null))
        })
    }

    pub fn binary<F, R>(func: F) -> Self
    where
        F: Fn(Value, Value) -> AnyResult<R> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        Self::variadic(Arity::Exact(2), move |args| {
            let mut args = args.into_iter();
            let first = args.next().unwrap_or(Value::Null);
            let second = args.next().unwrap_or(Value::Null);
            func(first, second)
        })
    }

    /// An operation for around steps: receives its input and the
    /// continuation running the rest of the pipeline.
    pub fn around<F, R>(func: F) -> Self
    where
        F: for<'a> Fn(Value, &mut Next<'a>) -> AnyResult<R> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        Self {
            arity: Arity::Exact(1),
            body: Body::Around(Arc::new(move |args: Vec<Value>, next: &mut Next<'_>| {
                let input = args.into_iter().next().unwrap_or(Value::Null);
                func(input, next).map(Into::into)
            })),
            rollback: None,
        }
    }

    pub fn with_rollback(mut self, rollback: impl Operation + 'static) -> Self {
        self.rollback = Some(Arc::new(rollback));
        self
    }
}

impl Operation for Callable {
    fn call(&self, invocation: Invocation<'_>) -> AnyResult<Reply> {
        let (args, next) = invocation.into_parts();
        if !self.arity.accepts(args.len()) {
            return Err(anyhow!(
                "wrong number of arguments (given {}, expected {})",
                args.len(),
                self.arity
            ));
        }
        match &self.body {
            Body::Plain(func) => func(args),
            Body::Around(func) => {
                let mut next =
                    next.ok_or_else(|| anyhow!("around operation called without a continuation"))?;
                func(args, &mut next)
            }
        }
    }

    fn arity(&self) -> Arity {
        self.arity
    }

    fn yields(&self) -> bool {
        matches!(self.body, Body::Around(_))
    }

    fn rollback(&self) -> Option<Arc<dyn Operation>> {
        self.rollback.clone()
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("arity", &self.arity)
            .field("yields", &self.yields())
            .field("rollback", &self.rollback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signed_arity_is_normalised() {
        assert_eq!(Arity::from_signed(2), Arity::Exact(2));
        assert_eq!(Arity::from_signed(-1), Arity::AtLeast(0));
        assert_eq!(Arity::from_signed(-3), Arity::AtLeast(2));
        assert_eq!(Arity::from_signed(-3).required(), 2);
    }

    #[test]
    fn callable_rejects_wrong_argument_count() {
        let op = Callable::binary(|a, b| Ok(json!([a, b])));
        assert!(op.call(Invocation::new(vec![json!(1)])).is_err());
        assert!(op.call(Invocation::new(vec![json!(1), json!(2)])).is_ok());
    }
}
