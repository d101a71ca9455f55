use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use serde_json::{json, Value};
use thiserror::Error;

use crate::operation::{Arity, Callable, Reply};
use crate::registry::Registry;

/// Raised by the demo `validate` operation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct NotValidError(pub String);

/// In-memory table written by the demo `persist` operation.
#[derive(Debug, Clone, Default)]
pub struct DemoDatabase {
    rows: Arc<Mutex<Vec<Value>>>,
}

impl DemoDatabase {
    pub fn rows(&self) -> Vec<Value> {
        self.rows.lock().expect("demo database poisoned").clone()
    }

    fn insert(&self, row: Value) {
        self.rows.lock().expect("demo database poisoned").push(row);
    }

    fn delete(&self, row: &Value) {
        let mut rows = self.rows.lock().expect("demo database poisoned");
        if let Some(index) = rows.iter().rposition(|existing| existing == row) {
            rows.remove(index);
        }
    }
}

fn text(value: &Value) -> anyhow::Result<&str> {
    value
        .as_str()
        .ok_or_else(|| anyhow!("expected a string, got {value}"))
}

fn nothing_to_undo() -> Callable {
    Callable::unary(|input| Ok(input))
}

/// Registers the demo operations and the `not_valid` error kind. Returns the
/// database `persist` writes to.
pub fn register_demo(registry: &Registry) -> DemoDatabase {
    let database = DemoDatabase::default();

    registry.register(
        "upcase",
        Callable::unary(|input| Ok(text(&input)?.to_uppercase())).with_rollback(nothing_to_undo()),
    );

    registry.register(
        "reverse",
        Callable::unary(|input| Ok(text(&input)?.chars().rev().collect::<String>()))
            .with_rollback(nothing_to_undo()),
    );

    registry.register(
        "exclaim_all",
        Callable::variadic(Arity::AtLeast(1), |args| {
            let suffix = args.get(1).and_then(Value::as_str).unwrap_or("!");
            let words = args.first().unwrap_or(&Value::Null);
            let words: Vec<String> = text(words)?
                .split_whitespace()
                .map(|word| format!("{word}{suffix}"))
                .collect();
            Ok(words.join(" "))
        })
        .with_rollback(nothing_to_undo()),
    );

    registry.register(
        "process",
        Callable::unary(|input| {
            Ok(json!({
                "name": input.get("name").cloned().unwrap_or(Value::Null),
                "email": input.get("email").cloned().unwrap_or(Value::Null),
            }))
        })
        .with_rollback(nothing_to_undo()),
    );

    registry.register(
        "verify",
        Callable::unary(|input| Ok(Reply::success(input))).with_rollback(nothing_to_undo()),
    );

    registry.register(
        "validate",
        Callable::unary(|input| {
            if input.get("email").map_or(true, Value::is_null) {
                return Err(NotValidError("email required".to_string()).into());
            }
            Ok(input)
        })
        .with_rollback(nothing_to_undo()),
    );

    let writer = database.clone();
    let undo = database.clone();
    registry.register(
        "persist",
        Callable::unary(move |input| {
            writer.insert(input);
            Ok(true)
        })
        .with_rollback(Callable::unary(move |input| {
            undo.delete(&input);
            Ok(input)
        })),
    );

    registry.register_error_kind::<NotValidError>("not_valid");
    database
}
