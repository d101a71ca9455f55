pub mod adapter;
pub mod builder;
pub mod definition;
pub mod demo;
pub mod error;
pub mod events;
pub mod failure;
pub mod logging;
pub mod matcher;
pub mod operation;
pub mod registry;
pub mod sequence;
mod stack;
pub mod step;

pub use adapter::{Adapter, AdapterKind, AdapterTable, StepCall};
pub use builder::{Builder, Declaration};
pub use definition::{StepDefinition, TransactionDefinition};
pub use error::{Error, Result};
pub use events::{EventKind, EventLog, Listener, StepEvent};
pub use failure::{Outcome, Payload, StepFailure, StepIdentity, StepOutcome};
pub use logging::JsonLogListener;
pub use matcher::{Match, MatchCase, MatcherTable};
pub use operation::{Arity, Callable, Invocation, Next, Operation, Reply};
pub use registry::{NoOperations, OperationResolver, Registry};
pub use sequence::{Position, Sequence, StepArgs};
pub use step::{Catch, Step, StepOptions, INITIAL_INPUT};
