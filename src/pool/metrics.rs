//! Pool state and statistics
//!
//! [`PoolMetrics`] is the snapshot handed to callers; [`CallStats`] tracks
//! engine call timing with a rolling window for jitter.

use crate::types::JobId;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// Size of the rolling window for recent call times
const RECENT_WINDOW_SIZE: usize = 100;

/// Lifecycle of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Constructed, engine not booted
    #[default]
    Created,
    /// Accepting jobs
    Running,
    /// A fatal engine fault happened; reboot required
    Faulted,
    /// Terminal; every operation fails
    Disposed,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Created => write!(f, "created"),
            Lifecycle::Running => write!(f, "running"),
            Lifecycle::Faulted => write!(f, "faulted"),
            Lifecycle::Disposed => write!(f, "disposed"),
        }
    }
}

/// State of the execution loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// No job executing
    #[default]
    Idle,
    /// A job was popped and the engine is about to be called
    Dispatching,
    /// An engine call is in progress
    Executing,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Idle => write!(f, "idle"),
            LoopState::Dispatching => write!(f, "dispatching"),
            LoopState::Executing => write!(f, "executing"),
        }
    }
}

/// Timing statistics for engine calls
#[derive(Debug, Clone, Serialize)]
pub struct CallStats {
    /// Calls that ended with a final chunk
    pub successful_calls: u64,
    /// Calls that ended with an error or without a final chunk
    pub failed_calls: u64,
    /// Total time spent in successful calls (microseconds)
    pub total_call_time_us: u64,
    /// Duration of the last successful call (microseconds)
    pub last_call_time_us: u64,
    /// Minimum call time observed (microseconds)
    pub min_call_time_us: u64,
    /// Maximum call time observed (microseconds)
    pub max_call_time_us: u64,
    /// Rolling window of recent call times
    #[serde(skip)]
    pub recent_call_times: VecDeque<u64>,
}

impl Default for CallStats {
    fn default() -> Self {
        Self {
            successful_calls: 0,
            failed_calls: 0,
            total_call_time_us: 0,
            last_call_time_us: 0,
            min_call_time_us: u64::MAX,
            max_call_time_us: 0,
            recent_call_times: VecDeque::with_capacity(RECENT_WINDOW_SIZE),
        }
    }
}

impl CallStats {
    /// Average successful call time in microseconds
    pub fn avg_call_time_us(&self) -> f64 {
        if self.successful_calls == 0 {
            0.0
        } else {
            self.total_call_time_us as f64 / self.successful_calls as f64
        }
    }

    /// Success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.successful_calls + self.failed_calls;
        if total == 0 {
            100.0
        } else {
            (self.successful_calls as f64 / total as f64) * 100.0
        }
    }

    /// Record a successful call
    pub fn record_success(&mut self, time_us: u64) {
        self.successful_calls += 1;
        self.total_call_time_us += time_us;
        self.last_call_time_us = time_us;
        self.min_call_time_us = self.min_call_time_us.min(time_us);
        self.max_call_time_us = self.max_call_time_us.max(time_us);

        self.recent_call_times.push_back(time_us);
        if self.recent_call_times.len() > RECENT_WINDOW_SIZE {
            self.recent_call_times.pop_front();
        }
    }

    /// Record a failed call
    pub fn record_failure(&mut self) {
        self.failed_calls += 1;
    }

    /// Max - min over the recent window in microseconds
    pub fn jitter_us(&self) -> u64 {
        let min = self.recent_call_times.iter().min().copied().unwrap_or(0);
        let max = self.recent_call_times.iter().max().copied().unwrap_or(0);
        max.saturating_sub(min)
    }
}

/// Job and chunk counters kept under the pool lock
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobCounters {
    /// Jobs accepted by `execute`
    pub submitted: u64,
    /// Jobs whose final data chunk reached their origin
    pub completed: u64,
    /// Jobs whose engine error reached their origin
    pub failed: u64,
    /// Jobs removed before dispatch (cancel, dispose, fault)
    pub cancelled: u64,
    /// Jobs that ran after their origin was closed or failed
    pub discarded: u64,
    /// Chunks forwarded to an origin
    pub chunks_delivered: u64,
    /// Chunks discarded because their origin was closed
    pub chunks_dropped: u64,
}

/// Snapshot of the pool for monitoring and debugging
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetrics {
    /// Pool lifecycle
    pub lifecycle: Lifecycle,
    /// Execution loop state
    pub loop_state: LoopState,
    /// Job currently executing
    pub active_job: Option<JobId>,
    /// Jobs waiting for dispatch
    pub jobs_in_queue: usize,
    /// Origins still bound
    pub bound_origins: usize,
    /// Message of the fault that stopped the pool
    pub fault: Option<String>,
    /// Job and chunk counters
    pub jobs: JobCounters,
    /// Engine call timing
    pub calls: CallStats,
}

impl PoolMetrics {
    /// Whether the engine is working on a job
    pub fn is_busy(&self) -> bool {
        self.loop_state != LoopState::Idle
    }
}
