use std::fmt;

use serde_json::Value;

use crate::error::Result;
use crate::failure::Outcome;
use crate::step::{Step, INITIAL_INPUT};

/// Per-call bookkeeping threaded through the chain.
#[derive(Debug, Default)]
pub(crate) struct RunState {
    /// `(step name, output)` pairs, oldest first; seeded with the initial input.
    pub outputs: Vec<(String, Value)>,
    /// `(step index, step input)` for every step that handed a success on.
    pub executed: Vec<(usize, Value)>,
}

impl RunState {
    pub fn new(initial: &Value) -> Self {
        Self {
            outputs: vec![(INITIAL_INPUT.to_string(), initial.clone())],
            executed: Vec::new(),
        }
    }
}

type Link = Box<dyn Fn(Outcome, &mut RunState) -> Result<Outcome> + Send + Sync>;

/// Right-to-left fold of steps: each link binds the incoming outcome, runs
/// its step and passes the step's outcome to the following link.
pub(crate) struct Stack {
    entry: Link,
}

impl Stack {
    pub fn compile(steps: &[Step]) -> Self {
        let mut next: Link = Box::new(|outcome: Outcome, _state: &mut RunState| Ok(outcome));
        for (index, step) in steps.iter().enumerate().rev() {
            let step = step.clone();
            let inner = next;
            next = Box::new(move |outcome: Outcome, state: &mut RunState| {
                let input = match outcome {
                    Ok(value) => value,
                    Err(failure) => return Ok(Err(failure)),
                };
                let args = step.arguments(&input, &state.outputs)?;
                let name = step.name().to_string();
                let entry = input.clone();
                step.call(input, args, &mut |outcome: Outcome| {
                    if let Ok(value) = &outcome {
                        state.outputs.push((name.clone(), value.clone()));
                        state.executed.push((index, entry.clone()));
                    }
                    inner(outcome, state)
                })
            });
        }
        Self { entry: next }
    }

    pub fn call(&self, input: Value, state: &mut RunState) -> Result<Outcome> {
        (self.entry)(Ok(input), state)
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Stack")
    }
}
