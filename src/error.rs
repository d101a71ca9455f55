use thiserror::Error as ThisError;

/// Configuration and programmer errors raised by the kernel.
///
/// These never travel through an [`Outcome`](crate::Outcome); pipeline
/// failures are carried as [`StepFailure`](crate::StepFailure) values instead.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("no operation `{operation}` defined for step `{step}`")]
    MissingStep { step: String, operation: String },

    #[error("transaction step `{step}` must be defined and satisfy the operation contract: {reason}")]
    InvalidStep { step: String, reason: String },

    #[error("step `{step}` must return an outcome: {reason}")]
    InvalidResult { step: String, reason: String },

    #[error("step `{step}` requires one or more error kinds provided via `catch`")]
    MissingCatchList { step: String },

    #[error("step `{step}` has no rollback action defined")]
    RollbackActionNotDefined { step: String },

    #[error("`{0}` is not a valid step name")]
    UnknownStep(String),

    #[error("not enough arguments supplied for step `{step}` (requires {required}, supplied {supplied})")]
    NotEnoughArguments {
        step: String,
        required: usize,
        supplied: usize,
    },

    #[error("step name `{0}` is already used in this transaction")]
    DuplicateStep(String),

    #[error("a transaction must be provided or defined in a block")]
    NoTransaction,

    #[error("step `{step}` selects input `{input}` which has not been produced")]
    UnknownInput { step: String, input: String },

    #[error("no step adapter registered as `{0}`")]
    UnknownAdapter(String),

    #[error("no match case named `{0}`")]
    UnknownMatchCase(String),

    #[error("no error kind registered as `{0}`")]
    UnknownErrorKind(String),

    #[error("operation for step `{step}` failed: {source}")]
    Operation {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("listener failed on step `{step}`: {source}")]
    Listener {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("rollback of step `{step}` failed: {source}")]
    Rollback {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid transaction definition: {0}")]
    Definition(String),
}

impl Error {
    /// Whether this error belongs to the argument-error family: bad step
    /// names or insufficient arguments handed to a transaction.
    pub fn is_argument_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownStep(_)
                | Error::NotEnoughArguments { .. }
                | Error::DuplicateStep(_)
                | Error::NoTransaction
                | Error::UnknownInput { .. }
        )
    }

    /// Wraps an error coming out of a step operation. Kernel errors that were
    /// raised further down the pipeline (inside an around continuation) are
    /// unwrapped so they surface unchanged.
    pub(crate) fn from_operation(step: &str, err: anyhow::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(inner) => inner,
            Err(source) => Error::Operation {
                step: step.to_string(),
                source,
            },
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
