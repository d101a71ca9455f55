use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::operation::Operation;
use crate::step::Catch;

/// Looks up operations (and named error kinds) when a transaction is built.
pub trait OperationResolver {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Operation>>;

    /// Catch matcher registered under `name`, for definition files.
    fn catch_named(&self, _name: &str) -> Option<Catch> {
        None
    }
}

impl OperationResolver for HashMap<String, Arc<dyn Operation>> {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.get(name).cloned()
    }
}

/// Resolver that knows no operations; useful when every step is injected.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOperations;

impl OperationResolver for NoOperations {
    fn resolve(&self, _name: &str) -> Option<Arc<dyn Operation>> {
        None
    }
}

struct RegistryInner {
    operations: HashMap<String, Arc<dyn Operation>>,
    bindings: HashMap<String, String>,
    error_kinds: HashMap<String, Catch>,
}

impl RegistryInner {
    fn new() -> Self {
        Self {
            operations: HashMap::new(),
            bindings: HashMap::new(),
            error_kinds: HashMap::new(),
        }
    }
}

/// Shared container of named operations.
///
/// Clones share the same table, so operations registered through one handle
/// are visible through every other.
pub struct Registry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Registry {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::new())),
        }
    }

    pub fn register<O>(&self, name: impl Into<String>, operation: O)
    where
        O: Operation + 'static,
    {
        self.register_arc(name, Arc::new(operation));
    }

    pub fn register_arc(&self, name: impl Into<String>, operation: Arc<dyn Operation>) {
        let mut inner = self.inner.lock().expect("registry poisoned");
        inner.operations.insert(name.into(), operation);
    }

    /// Makes `alias` resolve to the operation registered as `target`.
    pub fn set_binding(&self, alias: impl Into<String>, target: impl Into<String>) {
        let mut inner = self.inner.lock().expect("registry poisoned");
        inner.bindings.insert(alias.into(), target.into());
    }

    /// Registers the error type `E` under `name` so definition files can
    /// list it in a `catch` option.
    pub fn register_error_kind<E>(&self, name: impl Into<String>)
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        let name = name.into();
        let kind = Catch::of::<E>();
        let catch = Catch::named(name.clone(), move |err: &anyhow::Error| kind.matches(err));
        let mut inner = self.inner.lock().expect("registry poisoned");
        inner.error_kinds.insert(name, catch);
    }

    pub fn error_kind(&self, name: &str) -> Result<Catch> {
        self.catch_named(name)
            .ok_or_else(|| Error::UnknownErrorKind(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        let inner = self.inner.lock().expect("registry poisoned");
        find_operation(&inner, name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("registry poisoned");
        let mut names: Vec<String> = inner.operations.keys().cloned().collect();
        names.sort();
        names
    }
}

impl OperationResolver for Registry {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Operation>> {
        let inner = self.inner.lock().expect("registry poisoned");
        find_operation(&inner, name)
    }

    fn catch_named(&self, name: &str) -> Option<Catch> {
        let inner = self.inner.lock().expect("registry poisoned");
        inner.error_kinds.get(name).cloned()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("operations", &self.names())
            .finish()
    }
}

fn find_operation(inner: &RegistryInner, name: &str) -> Option<Arc<dyn Operation>> {
    if let Some(operation) = inner.operations.get(name) {
        return Some(operation.clone());
    }
    inner
        .bindings
        .get(name)
        .and_then(|target| inner.operations.get(target))
        .cloned()
}
