use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("Worker lane failed: {0}")]
    Lane(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid provider '{id}': {reason}")]
    InvalidProvider { id: String, reason: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {id} is {status}, update not applied")]
    Conflict {
        id: String,
        status: crate::model::JobStatus,
    },

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Blocking store task failed: {0}")]
    Join(String),
}

/// Coarse classification attached to a task-body failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskErrorKind {
    RateLimited,
    Timeout,
    Connection,
    /// Upstream HTTP status (5xx is transient, anything else is not).
    Upstream(u16),
    /// Known to be non-transient; never retried.
    Permanent,
    /// Opaque upstream error; classified from its message.
    Other,
}

/// Failure reported by a discovery task body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// An opaque error classified from its message alone.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Other, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Permanent, message)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
