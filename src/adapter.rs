use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::failure::{Payload, StepOutcome};
use crate::operation::{Invocation, Next, Operation, Reply};
use crate::step::StepOptions;

/// The calling convention of a step.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    Map,
    Raw,
    Tee,
    Try,
    Check,
    Around,
    Custom(String),
}

impl AdapterKind {
    pub fn as_str(&self) -> &str {
        match self {
            AdapterKind::Map => "map",
            AdapterKind::Raw => "step",
            AdapterKind::Tee => "tee",
            AdapterKind::Try => "try",
            AdapterKind::Check => "check",
            AdapterKind::Around => "around",
            AdapterKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdapterKind {
    type Err = std::convert::Infallible;

    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match name {
            "map" => AdapterKind::Map,
            "step" | "raw" => AdapterKind::Raw,
            "tee" => AdapterKind::Tee,
            "try" => AdapterKind::Try,
            "check" => AdapterKind::Check,
            "around" => AdapterKind::Around,
            other => AdapterKind::Custom(other.to_string()),
        })
    }
}

pub struct StepCall<'a> {
    pub step: &'a str,
    pub operation: &'a dyn Operation,
    pub options: &'a StepOptions,
    /// The value threaded into the step by the previous one.
    pub input: &'a Value,
    pub args: Vec<Value>,
}

impl StepCall<'_> {
    /// Calls the operation with the step's arguments. Errors not handled by
    /// the adapter propagate as [`Error::Operation`].
    pub fn invoke(&self) -> Result<Reply> {
        self.operation
            .call(Invocation::new(self.args.clone()))
            .map_err(|err| Error::from_operation(self.step, err))
    }

    fn invalid_result(&self, reason: &str) -> Error {
        Error::InvalidResult {
            step: self.step.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Adapts one operation call into a uniform outcome.
///
/// Adapters hold no state between calls. Closures of the shape
/// `Fn(StepCall) -> Result<StepOutcome>` are adapters, which is how custom
/// step kinds are registered.
pub trait Adapter: Send + Sync {
    fn call(&self, call: StepCall<'_>, next: Option<Next<'_>>) -> Result<StepOutcome>;

    /// Whether the adapter drives the continuation itself.
    fn yields(&self) -> bool {
        false
    }
}

impl<F> Adapter for F
where
    F: for<'a> Fn(StepCall<'a>) -> Result<StepOutcome> + Send + Sync,
{
    fn call(&self, call: StepCall<'_>, _next: Option<Next<'_>>) -> Result<StepOutcome> {
        (self)(call)
    }
}

/// Wraps the operation's return value as a success.
pub struct Map;

impl Adapter for Map {
    fn call(&self, call: StepCall<'_>, _next: Option<Next<'_>>) -> Result<StepOutcome> {
        match call.invoke()? {
            Reply::Value(value) => Ok(Ok(value)),
            Reply::Outcome(_) => Err(call.invalid_result("map steps return plain values; use a raw step")),
        }
    }
}

/// The operation already returns an outcome.
pub struct Raw;

impl Adapter for Raw {
    fn call(&self, call: StepCall<'_>, _next: Option<Next<'_>>) -> Result<StepOutcome> {
        match call.invoke()? {
            Reply::Outcome(outcome) => Ok(outcome),
            Reply::Value(_) => Err(call.invalid_result("raw steps must return an outcome")),
        }
    }
}

/// Runs the operation for its side effect and passes the input through.
pub struct Tee;

impl Adapter for Tee {
    fn call(&self, call: StepCall<'_>, _next: Option<Next<'_>>) -> Result<StepOutcome> {
        call.invoke()?;
        Ok(Ok(call.input.clone()))
    }
}

/// Captures the listed error kinds as failures.
pub struct Try;

impl Adapter for Try {
    fn call(&self, call: StepCall<'_>, _next: Option<Next<'_>>) -> Result<StepOutcome> {
        if call.options.catch.is_empty() {
            return Err(Error::MissingCatchList {
                step: call.step.to_string(),
            });
        }
        match call.operation.call(Invocation::new(call.args.clone())) {
            Ok(Reply::Value(value)) => Ok(Ok(value)),
            Ok(Reply::Outcome(outcome)) => Ok(outcome),
            Err(err) if call.options.catches(&err) => {
                let err = match &call.options.raise {
                    Some(remap) => remap(err),
                    None => err,
                };
                Ok(Err(Payload::error(err)))
            }
            Err(err) => Err(Error::from_operation(call.step, err)),
        }
    }
}

/// Passes the input through when the operation approves it.
///
/// `true` or a success outcome approve, `false` or a failure outcome reject;
/// either way the emitted payload is the step's input, never the
/// operation's own value.
pub struct Check;

impl Adapter for Check {
    fn call(&self, call: StepCall<'_>, _next: Option<Next<'_>>) -> Result<StepOutcome> {
        let approved = match call.invoke()? {
            Reply::Value(Value::Bool(flag)) => flag,
            Reply::Outcome(outcome) => outcome.is_ok(),
            Reply::Value(_) => {
                return Err(call.invalid_result("check steps must return a boolean or an outcome"))
            }
        };
        if approved {
            Ok(Ok(call.input.clone()))
        } else {
            Ok(Err(Payload::Value(call.input.clone())))
        }
    }
}

/// Hands the rest of the pipeline to the operation as a continuation.
pub struct Around;

impl Adapter for Around {
    fn call(&self, call: StepCall<'_>, next: Option<Next<'_>>) -> Result<StepOutcome> {
        let next = next.ok_or_else(|| Error::InvalidStep {
            step: call.step.to_string(),
            reason: "around steps need a continuation".to_string(),
        })?;
        let reply = call
            .operation
            .call(Invocation::with_next(call.args.clone(), next))
            .map_err(|err| Error::from_operation(call.step, err))?;
        match reply {
            Reply::Outcome(outcome) => Ok(outcome),
            Reply::Value(_) => Err(call.invalid_result("around steps must return an outcome")),
        }
    }

    fn yields(&self) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct AdapterTable {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl Default for AdapterTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.register("map", Map);
        table.register("step", Raw);
        table.register("raw", Raw);
        table.register("tee", Tee);
        table.register("try", Try);
        table.register("check", Check);
        table.register("around", Around);
        table
    }
}

impl AdapterTable {
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, adapter: impl Adapter + 'static) {
        self.adapters.insert(name.into(), Arc::new(adapter));
    }

    pub fn with(mut self, name: impl Into<String>, adapter: impl Adapter + 'static) -> Self {
        self.register(name, adapter);
        self
    }

    pub fn get(&self, kind: &AdapterKind) -> Result<Arc<dyn Adapter>> {
        self.adapters
            .get(kind.as_str())
            .cloned()
            .ok_or_else(|| Error::UnknownAdapter(kind.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for AdapterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterTable")
            .field("adapters", &self.names())
            .finish()
    }
}
