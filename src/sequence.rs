//! Sequences: ordered, immutable lists of steps and the operations that run
//! and edit them.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::builder::Builder;
use crate::error::{Error, Result};
use crate::events::Listener;
use crate::failure::Outcome;
use crate::matcher::{Match, MatcherTable};
use crate::operation::{Invocation, Operation, Reply};
use crate::registry::OperationResolver;
use crate::stack::{RunState, Stack};
use crate::step::Step;

pub type StepArgs = BTreeMap<String, Vec<Value>>;

/// Where [`Sequence::insert`] splices the other sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    Before(String),
    After(String),
}

impl Position {
    pub fn before(step: impl Into<String>) -> Self {
        Position::Before(step.into())
    }

    pub fn after(step: impl Into<String>) -> Self {
        Position::After(step.into())
    }

    fn step(&self) -> &str {
        match self {
            Position::Before(step) | Position::After(step) => step,
        }
    }
}

/// An ordered list of uniquely named steps compiled into one executor.
///
/// Every editing method returns a new sequence; the receiver is never
/// changed, so a sequence can be shared and called from many threads.
#[derive(Clone)]
pub struct Sequence {
    steps: Arc<[Step]>,
    stack: Arc<Stack>,
    matcher: MatcherTable,
    rollback: bool,
}

impl Sequence {
    pub fn new(steps: Vec<Step>) -> Result<Self> {
        ensure_unique(&steps)?;
        Ok(Self::from_checked(steps, MatcherTable::default(), false))
    }

    pub fn empty() -> Self {
        Self::from_checked(Vec::new(), MatcherTable::default(), false)
    }

    fn from_checked(steps: Vec<Step>, matcher: MatcherTable, rollback: bool) -> Self {
        let stack = Stack::compile(&steps);
        Self {
            steps: steps.into(),
            stack: Arc::new(stack),
            matcher,
            rollback,
        }
    }

    fn derive(&self, steps: Vec<Step>) -> Self {
        Self::from_checked(steps, self.matcher.clone(), self.rollback)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(Step::name).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn matcher(&self) -> &MatcherTable {
        &self.matcher
    }

    pub fn is_rollback_enabled(&self) -> bool {
        self.rollback
    }

    pub fn with_rollback(&self, enabled: bool) -> Self {
        let mut sequence = self.clone();
        sequence.rollback = enabled;
        sequence
    }

    pub fn with_matcher(&self, matcher: MatcherTable) -> Self {
        let mut sequence = self.clone();
        sequence.matcher = matcher;
        sequence
    }

    pub fn call(&self, input: Value) -> Result<Outcome> {
        self.run(input)
    }

    /// Runs the transaction with extra call arguments for some steps. The
    /// arguments only apply to this call.
    pub fn call_with(&self, input: Value, args: &StepArgs) -> Result<Outcome> {
        if args.is_empty() {
            return self.run(input);
        }
        self.with_step_args(args)?.run(input)
    }

    /// Runs the transaction and routes the outcome through the matcher.
    pub fn call_matching<'h, R, F>(&self, input: Value, handlers: F) -> Result<Option<R>>
    where
        F: FnOnce(&mut Match<'h, R>),
    {
        let outcome = self.call(input)?;
        self.matcher.evaluate(&outcome, handlers)
    }

    /// [`call_matching`](Self::call_matching) with per-step call arguments.
    pub fn call_matching_with<'h, R, F>(
        &self,
        input: Value,
        args: &StepArgs,
        handlers: F,
    ) -> Result<Option<R>>
    where
        F: FnOnce(&mut Match<'h, R>),
    {
        let outcome = self.call_with(input, args)?;
        self.matcher.evaluate(&outcome, handlers)
    }

    pub fn with_step_args(&self, args: &StepArgs) -> Result<Self> {
        for name in args.keys() {
            self.require(name)?;
        }
        let steps = self
            .steps
            .iter()
            .map(|step| match args.get(step.name()) {
                Some(call_args) => step.with_call_args(call_args.clone()),
                None => step.clone(),
            })
            .collect();
        Ok(self.derive(steps))
    }

    /// Replaces the operation behind one step, e.g. with a test double.
    pub fn with_operation(&self, name: &str, operation: Arc<dyn Operation>) -> Result<Self> {
        self.require(name)?;
        let steps = self
            .steps
            .iter()
            .map(|step| {
                if step.name() == name {
                    step.with_operation(operation.clone())
                } else {
                    step.clone()
                }
            })
            .collect();
        Ok(self.derive(steps))
    }

    /// The resolved operation of a step, for calling it directly.
    pub fn operation(&self, name: &str) -> Result<Arc<dyn Operation>> {
        Ok(self.require(name)?.operation()?.clone())
    }

    /// Calls one step's operation directly, outside the pipeline.
    pub fn call_operation(&self, name: &str, args: Vec<Value>) -> Result<Reply> {
        self.operation(name)?
            .call(Invocation::new(args))
            .map_err(|err| Error::from_operation(name, err))
    }

    pub fn subscribe(&self, listener: impl Listener + 'static) -> Self {
        let listener: Arc<dyn Listener> = Arc::new(listener);
        let steps = self
            .steps
            .iter()
            .map(|step| step.subscribe(listener.clone()))
            .collect();
        self.derive(steps)
    }

    pub fn subscribe_to(&self, name: &str, listener: impl Listener + 'static) -> Result<Self> {
        self.subscribe_steps([(name.to_string(), Arc::new(listener) as Arc<dyn Listener>)])
    }

    pub fn subscribe_steps<I>(&self, listeners: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Arc<dyn Listener>)>,
    {
        let mut steps: Vec<Step> = self.steps.to_vec();
        for (name, listener) in listeners {
            let step = steps
                .iter_mut()
                .find(|step| step.name() == name)
                .ok_or_else(|| Error::UnknownStep(name.clone()))?;
            *step = step.subscribe(listener);
        }
        Ok(self.derive(steps))
    }

    /// Drops the named steps. Unknown names are ignored.
    pub fn remove(&self, names: &[&str]) -> Self {
        let steps = self
            .steps
            .iter()
            .filter(|step| !names.contains(&step.name()))
            .cloned()
            .collect();
        self.derive(steps)
    }

    /// Splices `other`'s steps before or after a named step.
    pub fn insert(&self, other: &Sequence, at: Position) -> Result<Self> {
        let index = self.insertion_index(&at)?;
        self.splice(index, other)
    }

    /// Like [`insert`](Self::insert), defining the inserted steps inline.
    pub fn insert_with<F>(
        &self,
        at: Position,
        resolver: &dyn OperationResolver,
        define: F,
    ) -> Result<Self>
    where
        F: FnOnce(Builder) -> Builder,
    {
        let index = self.insertion_index(&at)?;
        let other = build_inline(resolver, define)?;
        self.splice(index, &other)
    }

    pub fn prepend(&self, other: &Sequence) -> Result<Self> {
        self.splice(0, other)
    }

    pub fn prepend_with<F>(&self, resolver: &dyn OperationResolver, define: F) -> Result<Self>
    where
        F: FnOnce(Builder) -> Builder,
    {
        self.prepend(&build_inline(resolver, define)?)
    }

    pub fn append(&self, other: &Sequence) -> Result<Self> {
        self.splice(self.steps.len(), other)
    }

    pub fn append_with<F>(&self, resolver: &dyn OperationResolver, define: F) -> Result<Self>
    where
        F: FnOnce(Builder) -> Builder,
    {
        self.append(&build_inline(resolver, define)?)
    }

    fn insertion_index(&self, at: &Position) -> Result<usize> {
        let index = self
            .steps
            .iter()
            .position(|step| step.name() == at.step())
            .ok_or_else(|| Error::UnknownStep(at.step().to_string()))?;
        Ok(match at {
            Position::Before(_) => index,
            Position::After(_) => index + 1,
        })
    }

    fn splice(&self, index: usize, other: &Sequence) -> Result<Self> {
        let mut steps = Vec::with_capacity(self.steps.len() + other.steps.len());
        steps.extend_from_slice(&self.steps[..index]);
        steps.extend_from_slice(&other.steps);
        steps.extend_from_slice(&self.steps[index..]);
        ensure_unique(&steps)?;
        Ok(self.derive(steps))
    }

    fn require(&self, name: &str) -> Result<&Step> {
        self.step(name)
            .ok_or_else(|| Error::UnknownStep(name.to_string()))
    }

    fn validate(&self) -> Result<()> {
        for step in self.steps.iter() {
            step.ensure_callable()?;
            step.ensure_arity()?;
            if self.rollback && step.rollback_operation().is_none() {
                return Err(Error::RollbackActionNotDefined {
                    step: step.name().to_string(),
                });
            }
        }
        Ok(())
    }

    fn run(&self, input: Value) -> Result<Outcome> {
        self.validate()?;
        log::debug!("running transaction with {} steps", self.steps.len());
        let mut state = RunState::new(&input);
        let outcome = self.stack.call(input, &mut state)?;
        if let Err(failure) = &outcome {
            log::debug!("transaction stopped at step `{}`", failure.step_name());
            if self.rollback {
                self.unwind(&state)?;
            }
        }
        Ok(outcome)
    }

    /// Rolls back every step that handed a success on, newest first.
    fn unwind(&self, state: &RunState) -> Result<()> {
        for (index, input) in state.executed.iter().rev() {
            let step = &self.steps[*index];
            let Some(rollback) = step.rollback_operation() else {
                return Err(Error::RollbackActionNotDefined {
                    step: step.name().to_string(),
                });
            };
            log::debug!("rolling back step `{}`", step.name());
            rollback
                .call(Invocation::new(vec![input.clone()]))
                .map_err(|source| Error::Rollback {
                    step: step.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("steps", &self.names())
            .field("rollback", &self.rollback)
            .finish()
    }
}

fn ensure_unique(steps: &[Step]) -> Result<()> {
    let mut seen = HashSet::new();
    for step in steps {
        if !seen.insert(step.name()) {
            return Err(Error::DuplicateStep(step.name().to_string()));
        }
    }
    Ok(())
}

fn build_inline<F>(resolver: &dyn OperationResolver, define: F) -> Result<Sequence>
where
    F: FnOnce(Builder) -> Builder,
{
    let builder = define(Builder::new());
    if builder.is_empty() {
        return Err(Error::NoTransaction);
    }
    builder.build(resolver)
}
