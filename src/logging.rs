use std::io::{stderr, stdout, Write};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use humantime::format_rfc3339;
use serde_json::{Map, Value};

use crate::events::{EventKind, Listener, StepEvent};

fn current_timestamp() -> String {
    let now = std::time::SystemTime::now();
    format_rfc3339(now).to_string()
}

fn level_for(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Started => "debug",
        EventKind::Succeeded => "info",
        EventKind::Failed => "error",
    }
}

fn write_console(entry: &Map<String, Value>) {
    if let Ok(serialized) = serde_json::to_string(entry) {
        let level = entry
            .get("level")
            .and_then(|v| v.as_str())
            .unwrap_or("info");
        if matches!(level, "error" | "fatal") {
            let _ = writeln!(stderr(), "{}", serialized);
        } else {
            let _ = writeln!(stdout(), "{}", serialized);
        }
    }
}

#[derive(Clone)]
enum Sink {
    Console,
    Buffer(Arc<Mutex<Vec<Value>>>),
}

/// Listener writing one JSON log line per step event.
///
/// Entries carry `level`, `message`, `tags`, `data` and an RFC 3339
/// `timestamp`. Failed steps log at `error` and go to stderr; everything
/// else goes to stdout.
#[derive(Clone)]
pub struct JsonLogListener {
    tags: Map<String, Value>,
    sink: Sink,
}

impl Default for JsonLogListener {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonLogListener {
    pub fn new() -> Self {
        Self {
            tags: Map::new(),
            sink: Sink::Console,
        }
    }

    /// Keeps entries in memory instead of printing them.
    pub fn capturing() -> Self {
        Self {
            tags: Map::new(),
            sink: Sink::Buffer(Arc::new(Mutex::new(Vec::new()))),
        }
    }

    /// Adds a tag to every entry. Only scalar values are kept.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        if matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
            self.tags.insert(key.into(), value);
        }
        self
    }

    /// Entries captured so far; empty for console listeners.
    pub fn entries(&self) -> Vec<Value> {
        match &self.sink {
            Sink::Buffer(buffer) => buffer.lock().expect("log buffer poisoned").clone(),
            Sink::Console => Vec::new(),
        }
    }

    fn entry(&self, event: &StepEvent) -> Map<String, Value> {
        let kind = event.kind();
        let message = match kind {
            EventKind::Started => format!("step {} started", event.step()),
            EventKind::Succeeded => format!("step {} succeeded", event.step()),
            EventKind::Failed => format!("step {} failed", event.step()),
        };

        let mut tags = self.tags.clone();
        tags.insert("component".to_string(), Value::String("transaction".to_string()));
        tags.insert("step".to_string(), Value::String(event.step().to_string()));

        let mut data = Map::new();
        data.insert("event".to_string(), Value::String(kind.as_str().to_string()));
        data.insert("args".to_string(), Value::Array(event.args().to_vec()));
        if let Some(value) = event.to_json().get("value") {
            data.insert("value".to_string(), value.clone());
        }

        let mut entry = Map::new();
        entry.insert("level".to_string(), Value::String(level_for(kind).to_string()));
        entry.insert("message".to_string(), Value::String(message));
        entry.insert("tags".to_string(), Value::Object(tags));
        entry.insert("data".to_string(), Value::Object(data));
        entry.insert("timestamp".to_string(), Value::String(current_timestamp()));
        entry
    }
}

impl Listener for JsonLogListener {
    fn notify(&self, event: &StepEvent) -> Result<()> {
        let entry = self.entry(event);
        match &self.sink {
            Sink::Console => write_console(&entry),
            Sink::Buffer(buffer) => buffer
                .lock()
                .expect("log buffer poisoned")
                .push(Value::Object(entry)),
        }
        Ok(())
    }
}
