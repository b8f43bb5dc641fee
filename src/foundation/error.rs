/// Crate-wide result alias.
pub type TaskmillResult<T> = Result<T, TaskmillError>;

/// Taskmill error taxonomy.
///
/// Contract violations (assigning a busy executor, double-claiming a task)
/// are deliberately absent: the free-list ownership design makes them
/// unrepresentable rather than recoverable.
#[derive(thiserror::Error, Debug)]
pub enum TaskmillError {
    /// Startup failure, e.g. a worker thread could not be spawned or the GPU
    /// context refused to bind.
    #[error("initialization error: {0}")]
    Init(String),

    /// Rejected configuration or API misuse detectable at the call boundary.
    #[error("validation error: {0}")]
    Validation(String),

    /// A blocking wait on the completion-event channel ran out of time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Passthrough for collaborator errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskmillError {
    /// Build an [`TaskmillError::Init`].
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Init(msg.into())
    }

    /// Build an [`TaskmillError::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build an [`TaskmillError::Timeout`].
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }
}
