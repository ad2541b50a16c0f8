use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("duplicate task name: {0}")]
    DuplicateTask(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("unknown task id: {0}")]
    UnknownTaskId(u64),

    #[error("invalid input for field `{field}`: {reason}")]
    InputValidation { field: String, reason: String },

    #[error("invalid output: {0}")]
    OutputValidation(String),

    #[error("timed out waiting for task completion")]
    Timeout,

    #[error("journal error: {0}")]
    Journal(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Error returned by a task body. Captured by the execution sandbox and
/// recorded as the task's traceback; never propagated to clients.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct TaskFailure {
    message: String,
}

impl TaskFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<EngineError> for TaskFailure {
    fn from(error: EngineError) -> Self {
        Self {
            message: error.to_string(),
        }
    }
}

impl From<String> for TaskFailure {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for TaskFailure {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}
