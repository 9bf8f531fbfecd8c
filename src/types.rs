//! Core data types for the explorer pool
//!
//! This module contains the data structures shared by the queue, the router
//! and the execution loop.
//!
//! # Main Types
//!
//! - [`Job`] - One unit of work: id, priority, engine method and parameters
//! - [`ResultChunk`] - A piece of a job's result stream, data or error
//! - [`QueueCommand`] - Control operations applied from outside the loop
//! - [`EngineMethod`] - The git operations the engine understands
//!
//! # Result Streams
//!
//! Every job produces zero or more non-final `Data` chunks followed by
//! exactly one terminal chunk, either `Data { is_final: true }` or `Error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::pool::origin::Origin;

/// Caller-assigned job identifier, unique among live jobs
pub type JobId = u64;

/// One queued unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique id among currently live jobs
    pub id: JobId,
    /// Higher is served first
    pub priority: i64,
    /// Name of the engine operation
    pub method: String,
    /// Opaque arguments forwarded to the engine
    #[serde(default)]
    pub params: Vec<Value>,
}

impl Job {
    /// Create a job with priority 0 and no parameters
    pub fn new(id: JobId, method: impl Into<String>) -> Self {
        Self {
            id,
            priority: 0,
            method: method.into(),
            params: Vec::new(),
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Append one parameter
    pub fn with_param(mut self, param: Value) -> Self {
        self.params.push(param);
        self
    }

    /// Replace the parameter list
    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} (priority {})", self.id, self.method, self.priority)
    }
}

/// A piece of a job's result stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultChunk {
    /// Partial or final data
    Data {
        id: JobId,
        payload: Value,
        is_final: bool,
    },
    /// Failure; always terminal
    Error { id: JobId, message: String },
}

impl ResultChunk {
    /// Non-final data chunk
    pub fn partial(id: JobId, payload: Value) -> Self {
        ResultChunk::Data {
            id,
            payload,
            is_final: false,
        }
    }

    /// Final data chunk
    pub fn complete(id: JobId, payload: Value) -> Self {
        ResultChunk::Data {
            id,
            payload,
            is_final: true,
        }
    }

    /// Terminal error chunk
    pub fn error(id: JobId, message: impl Into<String>) -> Self {
        ResultChunk::Error {
            id,
            message: message.into(),
        }
    }

    /// The job this chunk belongs to
    pub fn id(&self) -> JobId {
        match self {
            ResultChunk::Data { id, .. } | ResultChunk::Error { id, .. } => *id,
        }
    }

    /// Whether this chunk ends the job's stream
    pub fn is_terminal(&self) -> bool {
        match self {
            ResultChunk::Data { is_final, .. } => *is_final,
            ResultChunk::Error { .. } => true,
        }
    }

    /// Whether this is an error chunk
    pub fn is_error(&self) -> bool {
        matches!(self, ResultChunk::Error { .. })
    }
}

/// Control operations applied to the queue and router from outside the loop
#[derive(Clone)]
pub enum QueueCommand {
    /// Bind the origin and enqueue the job
    Submit(Job, Arc<dyn Origin>),
    /// Change a pending job's priority
    Reprioritize { id: JobId, priority: i64 },
    /// Remove a pending job
    Cancel(JobId),
    /// Detach the origin without stopping in-flight work
    CloseOrigin(JobId),
}

impl fmt::Debug for QueueCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueCommand::Submit(job, _) => f.debug_tuple("Submit").field(job).finish(),
            QueueCommand::Reprioritize { id, priority } => f
                .debug_struct("Reprioritize")
                .field("id", id)
                .field("priority", priority)
                .finish(),
            QueueCommand::Cancel(id) => f.debug_tuple("Cancel").field(id).finish(),
            QueueCommand::CloseOrigin(id) => f.debug_tuple("CloseOrigin").field(id).finish(),
        }
    }
}

/// Git operations exposed by the explorer engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineMethod {
    GetBranches,
    GetBlame,
    GetFileContent,
    GetFileTree,
    IsValidRev,
    GetCommit,
    GetCommitsForTimeRange,
    StreamCommits,
    StreamAuthors,
    StreamFileTree,
}

impl EngineMethod {
    /// All known methods
    pub const ALL: [EngineMethod; 10] = [
        EngineMethod::GetBranches,
        EngineMethod::GetBlame,
        EngineMethod::GetFileContent,
        EngineMethod::GetFileTree,
        EngineMethod::IsValidRev,
        EngineMethod::GetCommit,
        EngineMethod::GetCommitsForTimeRange,
        EngineMethod::StreamCommits,
        EngineMethod::StreamAuthors,
        EngineMethod::StreamFileTree,
    ];

    /// Method name as the engine expects it
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineMethod::GetBranches => "get_branches",
            EngineMethod::GetBlame => "get_blame",
            EngineMethod::GetFileContent => "get_file_content",
            EngineMethod::GetFileTree => "get_file_tree",
            EngineMethod::IsValidRev => "is_valid_rev",
            EngineMethod::GetCommit => "get_commit",
            EngineMethod::GetCommitsForTimeRange => "get_commits_for_time_range",
            EngineMethod::StreamCommits => "stream_commits",
            EngineMethod::StreamAuthors => "stream_authors",
            EngineMethod::StreamFileTree => "stream_file_tree",
        }
    }

    /// Look a method up by name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }

    /// Whether the method streams many data chunks before the final one
    pub fn is_stream(&self) -> bool {
        matches!(
            self,
            EngineMethod::StreamCommits | EngineMethod::StreamAuthors | EngineMethod::StreamFileTree
        )
    }

    /// Priority used when the caller does not pick one
    ///
    /// Blame requests start parked at 0 and are raised once their file
    /// becomes visible; streams run as background work.
    pub fn default_priority(&self, default_priority: i64, stream_priority: i64) -> i64 {
        match self {
            EngineMethod::GetBlame => 0,
            m if m.is_stream() => stream_priority,
            _ => default_priority,
        }
    }
}

impl fmt::Display for EngineMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a caller saw for one job, collected from its result stream
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    /// The job the outcome belongs to
    pub id: JobId,
    /// Payloads of the non-final data chunks, in emission order
    pub partials: Vec<Value>,
    /// Final payload, or the error message
    pub result: std::result::Result<Value, String>,
}

impl JobOutcome {
    /// Whether the job finished with data
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}
