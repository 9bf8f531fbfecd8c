//! Engine trait for the single-threaded git-reading backend
//!
//! This module provides the interface the execution loop drives. Real
//! implementations wrap a WASM instance; the scripted engine in
//! [`super::mock_engine`] stands in for it in tests.

use crate::error::EngineError;
use crate::types::Job;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One method call handed to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineRequest {
    /// Name of the engine operation
    pub method: String,
    /// Opaque arguments
    #[serde(default)]
    pub params: Vec<Value>,
}

impl EngineRequest {
    /// Create a request
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

impl From<Job> for EngineRequest {
    fn from(job: Job) -> Self {
        Self {
            method: job.method,
            params: job.params,
        }
    }
}

/// A piece of output produced by an engine call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineChunk {
    /// Opaque result data
    pub payload: Value,
    /// Whether this is the last chunk of the call
    pub is_final: bool,
}

impl EngineChunk {
    /// Intermediate chunk
    pub fn partial(payload: Value) -> Self {
        Self {
            payload,
            is_final: false,
        }
    }

    /// Last chunk of a call
    pub fn last(payload: Value) -> Self {
        Self {
            payload,
            is_final: true,
        }
    }
}

/// Output of one engine call
///
/// Yields zero or more chunks; the call ends at the first chunk with
/// `is_final` set, at the first error, or when the iterator is exhausted.
pub type ChunkStream<'a> = Box<dyn Iterator<Item = Result<EngineChunk, EngineError>> + 'a>;

/// Unified interface for the git engine
///
/// The engine owns a single execution thread and handles exactly one call
/// at a time. Implementations must be `Send` so the pool can move the
/// instance onto its worker thread; they never need to be `Sync` because
/// only the execution loop touches them.
///
/// # Example
///
/// ```ignore
/// fn branches(engine: &mut dyn Engine) -> Result<Vec<Value>, EngineError> {
///     let request = EngineRequest::new("get_branches", Vec::new());
///     engine.call(&request)?.map(|c| c.map(|c| c.payload)).collect()
/// }
/// ```
pub trait Engine: Send {
    /// Initialize from a repository snapshot
    ///
    /// Called again on the same instance after `dispose` when a faulted
    /// pool is rebooted.
    fn boot(&mut self, snapshot: &[u8]) -> Result<(), EngineError>;

    /// Start a method call
    ///
    /// Errors returned here, or yielded by the stream, are per-call unless
    /// they are [`EngineError::Fatal`].
    fn call(&mut self, request: &EngineRequest) -> Result<ChunkStream<'_>, EngineError>;

    /// Release the instance
    fn dispose(&mut self);

    /// Whether `boot` has succeeded and `dispose` has not been called since
    fn is_booted(&self) -> bool;

    /// Name used in logs
    fn name(&self) -> &str {
        "engine"
    }
}
