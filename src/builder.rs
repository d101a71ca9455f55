use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::adapter::{Adapter, AdapterKind, AdapterTable};
use crate::error::{Error, Result};
use crate::events::Listener;
use crate::matcher::MatcherTable;
use crate::operation::Operation;
use crate::registry::OperationResolver;
use crate::sequence::Sequence;
use crate::step::{Step, StepOptions};

/// One declared step before its operation is resolved.
#[derive(Debug, Clone)]
pub struct Declaration {
    kind: AdapterKind,
    name: String,
    operation_name: String,
    options: StepOptions,
    args: Vec<Value>,
}

impl Declaration {
    pub fn new(kind: AdapterKind, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind,
            operation_name: name.clone(),
            name,
            options: StepOptions::default(),
            args: Vec::new(),
        }
    }

    pub fn with(mut self, operation_name: impl Into<String>) -> Self {
        self.operation_name = operation_name.into();
        self
    }

    pub fn options(mut self, options: StepOptions) -> Self {
        self.options = options;
        self
    }

    /// Extra arguments appended after the step's primary input.
    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }
}

/// Collects step declarations and builds them into a [`Sequence`].
///
/// ```
/// use serde_json::json;
/// use txn_kernel_rs::{Builder, Callable, Registry};
///
/// let registry = Registry::new();
/// registry.register("double", Callable::unary(|v| Ok(json!(v.as_i64().unwrap_or(0) * 2))));
///
/// let sequence = Builder::new().map("double").build(&registry).unwrap();
/// assert_eq!(sequence.call(json!(21)).unwrap().unwrap(), json!(42));
/// ```
pub struct Builder {
    adapters: AdapterTable,
    declarations: Vec<Declaration>,
    injected: HashMap<String, Arc<dyn Operation>>,
    local: HashMap<String, Arc<dyn Operation>>,
    listeners: Vec<Arc<dyn Listener>>,
    rollback: bool,
    matcher: MatcherTable,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            adapters: AdapterTable::default(),
            declarations: Vec::new(),
            injected: HashMap::new(),
            local: HashMap::new(),
            listeners: Vec::new(),
            rollback: false,
            matcher: MatcherTable::default(),
        }
    }

    pub fn declare(mut self, declaration: Declaration) -> Self {
        self.declarations.push(declaration);
        self
    }

    pub fn map(self, name: impl Into<String>) -> Self {
        self.declare(Declaration::new(AdapterKind::Map, name))
    }

    pub fn step(self, name: impl Into<String>) -> Self {
        self.declare(Declaration::new(AdapterKind::Raw, name))
    }

    pub fn tee(self, name: impl Into<String>) -> Self {
        self.declare(Declaration::new(AdapterKind::Tee, name))
    }

    pub fn check(self, name: impl Into<String>) -> Self {
        self.declare(Declaration::new(AdapterKind::Check, name))
    }

    pub fn around(self, name: impl Into<String>) -> Self {
        self.declare(Declaration::new(AdapterKind::Around, name))
    }

    pub fn try_step(self, name: impl Into<String>, options: StepOptions) -> Self {
        self.declare(Declaration::new(AdapterKind::Try, name).options(options))
    }

    pub fn custom(self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        self.declare(Declaration::new(AdapterKind::Custom(kind.into()), name))
    }

    pub fn adapter(mut self, kind: impl Into<String>, adapter: impl Adapter + 'static) -> Self {
        self.adapters.register(kind, adapter);
        self
    }

    pub fn with_adapters(mut self, adapters: AdapterTable) -> Self {
        self.adapters = adapters;
        self
    }

    /// Supplies the operation for step `step` directly, overriding any other
    /// source.
    pub fn inject(mut self, step: impl Into<String>, operation: impl Operation + 'static) -> Self {
        self.injected.insert(step.into(), Arc::new(operation));
        self
    }

    /// Defines the operation of step `step` on the transaction itself; used
    /// unless an injection exists.
    pub fn local(mut self, step: impl Into<String>, operation: impl Operation + 'static) -> Self {
        self.local.insert(step.into(), Arc::new(operation));
        self
    }

    pub fn listener(mut self, listener: impl Listener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn rollback(mut self, enabled: bool) -> Self {
        self.rollback = enabled;
        self
    }

    pub fn matcher(mut self, matcher: MatcherTable) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    pub fn build(&self, resolver: &dyn OperationResolver) -> Result<Sequence> {
        let mut steps = Vec::with_capacity(self.declarations.len());
        for declaration in &self.declarations {
            let step = Step::new(
                declaration.name.clone(),
                declaration.operation_name.clone(),
                declaration.kind.clone(),
                &self.adapters,
                declaration.options.clone(),
            )?;
            let operation = self.resolve(declaration, resolver)?;
            let mut step = step
                .with_operation(operation)
                .with_call_args(declaration.args.clone());
            for listener in &self.listeners {
                step = step.subscribe(listener.clone());
            }
            step.ensure_callable()?;
            steps.push(step);
        }
        log::debug!("built transaction with {} steps", steps.len());
        Ok(Sequence::new(steps)?
            .with_rollback(self.rollback)
            .with_matcher(self.matcher.clone()))
    }

    fn resolve(
        &self,
        declaration: &Declaration,
        resolver: &dyn OperationResolver,
    ) -> Result<Arc<dyn Operation>> {
        if let Some(operation) = self.injected.get(&declaration.name) {
            return Ok(operation.clone());
        }
        if let Some(operation) = self.local.get(&declaration.name) {
            return Ok(operation.clone());
        }
        resolver
            .resolve(&declaration.operation_name)
            .ok_or_else(|| Error::MissingStep {
                step: declaration.name.clone(),
                operation: declaration.operation_name.clone(),
            })
    }
}
