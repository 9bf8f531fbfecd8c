//! Error handling for the explorer pool
//!
//! This module defines the pool's error taxonomy and a Result alias for use
//! throughout the crate. Engine failures have their own type,
//! [`EngineError`], because they travel to callers as `Error` chunks rather
//! than as returned errors.

use crate::types::JobId;
use thiserror::Error;

/// Failure reported by an engine implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The call failed; only the job that issued it is affected
    #[error("{0}")]
    Call(String),

    /// The engine instance is unusable (corrupted or unresponsive)
    #[error("fatal engine fault: {0}")]
    Fatal(String),

    /// The engine could not initialize from the given snapshot
    #[error("engine boot failed: {0}")]
    Boot(String),
}

impl EngineError {
    /// Whether this fault takes the whole pool down
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_))
    }

    /// The message without the variant prefix
    pub fn message(&self) -> &str {
        match self {
            EngineError::Call(msg) | EngineError::Fatal(msg) | EngineError::Boot(msg) => msg,
        }
    }
}

/// Main error type for pool operations
#[derive(Error, Debug)]
pub enum PoolError {
    /// A job with this id is already pending or executing
    #[error("Duplicate job id: {0}")]
    DuplicateId(JobId),

    /// An origin is already bound to this job id
    #[error("Duplicate origin binding for job {0}")]
    DuplicateBinding(JobId),

    /// The job is executing or unknown, so it cannot be removed
    #[error("Job {0} is not pending")]
    NotPending(JobId),

    /// The engine hit a fatal fault; the pool must be rebooted
    #[error("Pool faulted: {0}")]
    PoolFaulted(String),

    /// The pool has been disposed
    #[error("Pool disposed")]
    PoolDisposed,

    /// The pool has not been booted yet
    #[error("Pool not booted")]
    NotBooted,

    /// `boot` was called on a pool that is already running
    #[error("Pool already booted")]
    AlreadyBooted,

    /// The engine refused to initialize
    #[error("Boot failed: {0}")]
    BootFailed(String),

    /// The submitted job is malformed
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// Errors surfaced directly from the engine
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// The job's result stream ended before its terminal chunk
    #[error("Results for job {0} closed before completion")]
    OriginClosed(JobId),

    /// Errors related to waiting on a job's results
    #[error("Timeout: {0}")]
    Timeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PoolError>,
    },
}

impl PoolError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PoolError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip any context wrappers and return the underlying error
    pub fn root(&self) -> &PoolError {
        match self {
            PoolError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for PoolError {
    fn from(err: serde_json::Error) -> Self {
        PoolError::Serialization(err.to_string())
    }
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, EngineError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PoolError::Engine(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| PoolError::Engine(e).with_context(f()))
    }
}
