use std::fmt;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde_json::{json, Value};

use crate::failure::Payload;

/// Which lifecycle point an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Succeeded,
    Failed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Started => "step",
            EventKind::Succeeded => "step_succeeded",
            EventKind::Failed => "step_failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum StepEvent {
    Started {
        step: String,
        args: Vec<Value>,
    },
    Succeeded {
        step: String,
        args: Vec<Value>,
        value: Value,
    },
    Failed {
        step: String,
        args: Vec<Value>,
        value: Payload,
    },
}

impl StepEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StepEvent::Started { .. } => EventKind::Started,
            StepEvent::Succeeded { .. } => EventKind::Succeeded,
            StepEvent::Failed { .. } => EventKind::Failed,
        }
    }

    pub fn step(&self) -> &str {
        match self {
            StepEvent::Started { step, .. }
            | StepEvent::Succeeded { step, .. }
            | StepEvent::Failed { step, .. } => step,
        }
    }

    pub fn args(&self) -> &[Value] {
        match self {
            StepEvent::Started { args, .. }
            | StepEvent::Succeeded { args, .. }
            | StepEvent::Failed { args, .. } => args,
        }
    }

    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "event": self.kind().as_str(),
            "step_name": self.step(),
            "args": self.args(),
        });
        match self {
            StepEvent::Succeeded { value, .. } => body["value"] = value.clone(),
            StepEvent::Failed { value, .. } => body["value"] = value.to_json(),
            StepEvent::Started { .. } => {}
        }
        body
    }
}

/// Receives step lifecycle events synchronously, in the call path.
///
/// An error returned by a listener aborts the transaction.
pub trait Listener: Send + Sync {
    fn notify(&self, event: &StepEvent) -> Result<()>;
}

impl<F> Listener for F
where
    F: Fn(&StepEvent) -> Result<()> + Send + Sync,
{
    fn notify(&self, event: &StepEvent) -> Result<()> {
        (self)(event)
    }
}

/// Listener keeping every event it sees. Mostly useful in tests.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<StepEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StepEvent> {
        self.events.lock().expect("event log poisoned").clone()
    }

    /// `"<kind>:<step>"` strings, in order of arrival.
    pub fn summary(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|event| format!("{}:{}", event.kind(), event.step()))
            .collect()
    }
}

impl Listener for EventLog {
    fn notify(&self, event: &StepEvent) -> Result<()> {
        self.events
            .lock()
            .expect("event log poisoned")
            .push(event.clone());
        Ok(())
    }
}
