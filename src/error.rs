use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Kind-tagged error taxonomy shared by every subsystem of the crate.
///
/// Container and repository-host operations return these directly; the tool
/// dispatcher converts them into structured `{"error": ...}` tool results so
/// a failing tool call never aborts a running ReAct loop.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("container limit reached for group '{group_id}' (limit {limit})")]
    ContainerLimitReached { group_id: String, limit: usize },

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("container creation failed: {0}")]
    ContainerCreationFailed(String),

    #[error("container execution failed: {0}")]
    ContainerExecutionFailed(String),

    #[error("container destruction failed: {0}")]
    ContainerDestructionFailed(String),

    // The exact wording is part of the public contract; callers match on it.
    #[error("Prompt too large: {tokens} tokens exceeds {model} limit of {limit} tokens")]
    PromptTooLarge {
        tokens: usize,
        model: String,
        limit: usize,
    },

    #[error("transient upstream model error: {0}")]
    ModelUpstreamTransient(String),

    #[error("fatal upstream model error: {0}")]
    ModelUpstreamFatal(String),

    #[error("Unknown tool: {0}")]
    ToolUnknown(String),

    #[error("invalid arguments for tool '{tool}': {message}")]
    ToolArgumentInvalid { tool: String, message: String },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("invalid session state: {0}")]
    SessionStateInvalid(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("failed to parse plan from model output: {0}")]
    PlanParseFailed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("repository host request failed with status {status}: {message}")]
    RepoHostRequestFailed { status: u16, message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("network request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn internal(message: impl Into<String>) -> Self {
        CoreError::Internal(message.into())
    }
}
