use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::adapter::{Adapter, AdapterKind, AdapterTable, StepCall};
use crate::error::{Error, Result};
use crate::events::{Listener, StepEvent};
use crate::failure::{Outcome, StepFailure, StepIdentity, StepOutcome};
use crate::operation::{Arity, Next, Operation};

/// Name under which the transaction's initial input can be selected.
pub const INITIAL_INPUT: &str = "_initial";

pub type ErrorMapper = Arc<dyn Fn(anyhow::Error) -> anyhow::Error + Send + Sync>;

/// An error kind a `try` step captures.
#[derive(Clone)]
pub struct Catch {
    name: String,
    matcher: Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>,
}

impl Catch {
    pub fn of<E>() -> Self
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self {
            name: std::any::type_name::<E>().to_string(),
            matcher: Arc::new(|err: &anyhow::Error| err.is::<E>()),
        }
    }

    pub fn named<F>(name: impl Into<String>, matcher: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            matcher: Arc::new(matcher),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self, err: &anyhow::Error) -> bool {
        (self.matcher)(err)
    }
}

impl fmt::Debug for Catch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Catch").field(&self.name).finish()
    }
}

#[derive(Clone, Default)]
pub struct StepOptions {
    pub catch: Vec<Catch>,
    /// Remaps a captured error before it becomes the failure payload.
    pub raise: Option<ErrorMapper>,
    /// Names of earlier steps whose outputs become the positional inputs.
    pub input: Option<Vec<String>>,
    /// Label attached to failures of this step, for custom matchers.
    pub failure: Option<String>,
    pub rollback: Option<Arc<dyn Operation>>,
}

impl StepOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catch<E>(self) -> Self
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.catching(Catch::of::<E>())
    }

    pub fn catching(mut self, catch: Catch) -> Self {
        self.catch.push(catch);
        self
    }

    pub fn raise<F>(mut self, remap: F) -> Self
    where
        F: Fn(anyhow::Error) -> anyhow::Error + Send + Sync + 'static,
    {
        self.raise = Some(Arc::new(remap));
        self
    }

    pub fn input<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn failure(mut self, label: impl Into<String>) -> Self {
        self.failure = Some(label.into());
        self
    }

    pub fn rollback(mut self, operation: impl Operation + 'static) -> Self {
        self.rollback = Some(Arc::new(operation));
        self
    }

    pub fn catches(&self, err: &anyhow::Error) -> bool {
        self.catch.iter().any(|catch| catch.matches(err))
    }
}

impl fmt::Debug for StepOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepOptions")
            .field("catch", &self.catch)
            .field("raise", &self.raise.is_some())
            .field("input", &self.input)
            .field("failure", &self.failure)
            .field("rollback", &self.rollback.is_some())
            .finish()
    }
}

/// One named unit of work in a transaction. Steps are values: every
/// `with_*` method returns a new step and leaves the receiver untouched.
#[derive(Clone)]
pub struct Step {
    identity: Arc<StepIdentity>,
    kind: AdapterKind,
    adapter: Arc<dyn Adapter>,
    operation: Option<Arc<dyn Operation>>,
    options: StepOptions,
    call_args: Vec<Value>,
    listeners: Vec<Arc<dyn Listener>>,
}

impl Step {
    pub fn new(
        name: impl Into<String>,
        operation_name: impl Into<String>,
        kind: AdapterKind,
        adapters: &AdapterTable,
        options: StepOptions,
    ) -> Result<Self> {
        let name = name.into();
        if kind == AdapterKind::Try && options.catch.is_empty() {
            return Err(Error::MissingCatchList { step: name });
        }
        let adapter = adapters.get(&kind)?;
        let identity = StepIdentity {
            name,
            operation_name: operation_name.into(),
            adapter: kind.to_string(),
            failure_label: options.failure.clone(),
        };
        Ok(Self {
            identity: Arc::new(identity),
            kind,
            adapter,
            operation: None,
            options,
            call_args: Vec::new(),
            listeners: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn operation_name(&self) -> &str {
        &self.identity.operation_name
    }

    pub fn identity(&self) -> &StepIdentity {
        &self.identity
    }

    pub fn kind(&self) -> &AdapterKind {
        &self.kind
    }

    pub fn options(&self) -> &StepOptions {
        &self.options
    }

    pub fn call_args(&self) -> &[Value] {
        &self.call_args
    }

    pub fn has_operation(&self) -> bool {
        self.operation.is_some()
    }

    pub fn operation(&self) -> Result<&Arc<dyn Operation>> {
        self.operation.as_ref().ok_or_else(|| Error::MissingStep {
            step: self.name().to_string(),
            operation: self.operation_name().to_string(),
        })
    }

    pub fn with_operation(&self, operation: Arc<dyn Operation>) -> Self {
        let mut step = self.clone();
        step.operation = Some(operation);
        step
    }

    pub fn with_call_args(&self, call_args: Vec<Value>) -> Self {
        let mut step = self.clone();
        step.call_args = call_args;
        step
    }

    pub fn subscribe(&self, listener: Arc<dyn Listener>) -> Self {
        let mut step = self.clone();
        step.listeners.push(listener);
        step
    }

    pub fn arity(&self) -> Result<Arity> {
        Ok(self.operation()?.arity())
    }

    pub fn primary_inputs(&self) -> usize {
        self.options.input.as_ref().map_or(1, Vec::len)
    }

    /// Rollback action: the step option wins over the operation's own.
    pub fn rollback_operation(&self) -> Option<Arc<dyn Operation>> {
        self.options
            .rollback
            .clone()
            .or_else(|| self.operation.as_ref().and_then(|op| op.rollback()))
    }

    /// Verifies the resolved operation fits the step's adapter.
    pub fn ensure_callable(&self) -> Result<()> {
        let operation = self.operation()?;
        if operation.yields() != self.adapter.yields() {
            let reason = if self.adapter.yields() {
                "around steps need an operation taking a continuation"
            } else {
                "operations taking a continuation can only back around steps"
            };
            return Err(Error::InvalidStep {
                step: self.name().to_string(),
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    pub fn ensure_arity(&self) -> Result<()> {
        let required = self.arity()?.required();
        let supplied = self.primary_inputs() + self.call_args.len();
        if required > supplied {
            return Err(Error::NotEnoughArguments {
                step: self.name().to_string(),
                required,
                supplied,
            });
        }
        Ok(())
    }

    /// Builds the operation's argument vector from the threaded input or the
    /// selected earlier outputs, followed by the call args.
    pub fn arguments(&self, input: &Value, outputs: &[(String, Value)]) -> Result<Vec<Value>> {
        let mut args = match &self.options.input {
            None => vec![input.clone()],
            Some(names) => names
                .iter()
                .map(|name| {
                    outputs
                        .iter()
                        .rev()
                        .find(|(step, _)| step == name)
                        .map(|(_, value)| value.clone())
                        .ok_or_else(|| Error::UnknownInput {
                            step: self.name().to_string(),
                            input: name.clone(),
                        })
                })
                .collect::<Result<Vec<_>>>()?,
        };
        args.extend(self.call_args.iter().cloned());
        Ok(args)
    }

    /// Runs the step and hands its outcome to `rest`.
    ///
    /// Around adapters receive `rest` as their continuation; every other
    /// adapter's outcome is passed to `rest` once it is computed.
    pub fn call(
        &self,
        input: Value,
        args: Vec<Value>,
        rest: &mut dyn FnMut(Outcome) -> Result<Outcome>,
    ) -> Result<Outcome> {
        let operation = self.operation()?.clone();
        self.notify(&StepEvent::Started {
            step: self.name().to_string(),
            args: args.clone(),
        })?;
        log::trace!("step `{}` ({}) started", self.name(), self.kind);

        let call = StepCall {
            step: self.name(),
            operation: operation.as_ref(),
            options: &self.options,
            input: &input,
            args: args.clone(),
        };

        if self.adapter.yields() {
            let next = Next::new(self.identity.clone(), rest);
            let outcome = self.adapter.call(call, Some(next))?;
            return self.settle(args, outcome);
        }

        let outcome = self.adapter.call(call, None)?;
        let outcome = self.settle(args, outcome)?;
        rest(outcome)
    }

    fn settle(&self, args: Vec<Value>, outcome: StepOutcome) -> Result<Outcome> {
        match outcome {
            Ok(value) => {
                log::debug!("step `{}` succeeded", self.name());
                self.notify(&StepEvent::Succeeded {
                    step: self.name().to_string(),
                    args,
                    value: value.clone(),
                })?;
                Ok(Ok(value))
            }
            Err(payload) => {
                log::debug!("step `{}` failed: {payload}", self.name());
                self.notify(&StepEvent::Failed {
                    step: self.name().to_string(),
                    args,
                    value: payload.clone(),
                })?;
                Ok(Err(StepFailure::tag(self.identity.clone(), payload)))
            }
        }
    }

    fn notify(&self, event: &StepEvent) -> Result<()> {
        for listener in &self.listeners {
            listener.notify(event).map_err(|source| Error::Listener {
                step: self.name().to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.identity.name)
            .field("operation_name", &self.identity.operation_name)
            .field("kind", &self.kind)
            .field("resolved", &self.operation.is_some())
            .field("options", &self.options)
            .field("call_args", &self.call_args)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
