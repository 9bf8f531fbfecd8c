//! Replay of scripted job sessions
//!
//! A replay file describes a scripted engine and a batch of jobs. The batch
//! is queued while the engine is held busy, so dispatch order depends only on
//! priorities and submission order, then run through a real [`Pool`].
//!
//! # File Format
//!
//! ```json
//! {
//!   "snapshot": "repo.tar",
//!   "engine": { "methods": { "get_branches": [{"step": "final", "payload": ["main"]}] } },
//!   "jobs": [
//!     { "id": 1, "method": "get_branches", "priority": 5 },
//!     { "id": 2, "method": "get_blame", "cancel": true }
//!   ]
//! }
//! ```

use crate::config::PoolConfig;
use crate::engine::{EngineScript, ScriptStep, ScriptedEngine};
use crate::error::{PoolError, Result, ResultExt};
use crate::pool::{ChannelOrigin, Pool, PoolMetrics, RecordingOrigin};
use crate::types::{Job, JobId, ResultChunk};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Method used to hold the engine while the batch is queued
const HOLD_METHOD: &str = "__replay_hold";

fn default_timeout_ms() -> u64 {
    5_000
}

/// One job of a replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayJob {
    /// Job id
    pub id: JobId,
    /// Engine method
    pub method: String,
    /// Explicit priority; the method's default when absent
    #[serde(default)]
    pub priority: Option<i64>,
    /// Method parameters
    #[serde(default)]
    pub params: Vec<Value>,
    /// Cancel the job right after queueing
    #[serde(default)]
    pub cancel: bool,
    /// Close the job's origin right after queueing
    #[serde(default)]
    pub close: bool,
}

/// A complete replay session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayFile {
    /// Snapshot handed to `boot`
    #[serde(default)]
    pub snapshot: String,
    /// Scripted engine responses
    #[serde(default)]
    pub engine: EngineScript,
    /// Jobs, in submission order
    pub jobs: Vec<ReplayJob>,
    /// How long to wait for all results
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl ReplayFile {
    /// Load a replay file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(PoolError::from)
            .with_context(|| format!("Failed to read replay {}", path.display()))?;
        Self::from_json_str(&content)
    }

    /// Parse a replay from JSON text
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

/// Everything a replay produced
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    /// Chunks delivered to the jobs' origins, in delivery order
    pub chunks: Vec<ResultChunk>,
    /// Pool state after the run
    pub metrics: PoolMetrics,
}

/// Id for the hold job: one past the highest replay id, or the lowest free
/// id when the batch already uses `JobId::MAX`
fn hold_job_id(jobs: &[ReplayJob]) -> JobId {
    let used: HashSet<JobId> = jobs.iter().map(|job| job.id).collect();
    match used.iter().max() {
        None => 0,
        Some(&max) => match max.checked_add(1) {
            Some(next) => next,
            None => (0..).find(|id| !used.contains(id)).unwrap_or(0),
        },
    }
}

/// Run a replay through a fresh pool
pub fn run_replay(file: ReplayFile, config: PoolConfig) -> Result<ReplayReport> {
    let mut engine = ScriptedEngine::from_script(file.engine)
        .with_script(HOLD_METHOD, vec![ScriptStep::last(Value::Null)]);
    let hold = engine.gate(HOLD_METHOD);
    let timeout = Duration::from_millis(file.timeout_ms);

    let pool = Pool::new(Box::new(engine), config);
    pool.boot(file.snapshot.as_bytes())
        .context("Failed to boot replay engine")?;

    // Hold the engine busy with a job no replay job can outrank
    let hold_id = hold_job_id(&file.jobs);
    let (hold_origin, hold_results) = ChannelOrigin::pair();
    pool.execute(
        Job::new(hold_id, HOLD_METHOD).with_priority(i64::MAX),
        Arc::new(hold_origin),
    )?;
    if !hold.wait_started(timeout) {
        return Err(PoolError::Timeout("replay engine never started".to_string()));
    }

    let origin = Arc::new(RecordingOrigin::new());
    let mut expected = 0;
    for job in &file.jobs {
        let priority = job
            .priority
            .unwrap_or_else(|| pool.default_priority_for(&job.method));
        let queued = Job::new(job.id, job.method.clone())
            .with_priority(priority)
            .with_params(job.params.clone());
        pool.execute(queued, origin.clone())
            .with_context(|| format!("Failed to queue replay job {}", job.id))?;
        if !job.close {
            expected += 1;
        }
    }

    for job in &file.jobs {
        if job.close {
            pool.close_origin(job.id)?;
        } else if job.cancel && !pool.cancel(job.id)? {
            tracing::warn!("Replay job {} could not be cancelled", job.id);
        }
    }

    hold.release();
    hold_results
        .recv_timeout(timeout)
        .map_err(|_| PoolError::Timeout("replay engine stayed busy".to_string()))?;

    if !origin.wait_for_terminals(expected, timeout) {
        pool.debug_print();
        return Err(PoolError::Timeout(format!(
            "{} of {} replay jobs finished",
            origin.terminal_order().len(),
            expected
        )));
    }

    pool.dispose()?;
    pool.join_worker();

    Ok(ReplayReport {
        chunks: origin.chunks(),
        metrics: pool.metrics(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn replay(value: Value) -> ReplayFile {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_replay_runs_in_priority_order() {
        let file = replay(json!({
            "snapshot": "repo",
            "engine": {
                "methods": {
                    "get_commit": [{"step": "final", "payload": "c"}],
                    "get_branches": [{"step": "final", "payload": ["main"]}]
                }
            },
            "jobs": [
                {"id": 1, "method": "get_commit", "priority": 1},
                {"id": 2, "method": "get_branches", "priority": 5},
                {"id": 3, "method": "get_commit", "priority": 1}
            ]
        }));

        let report = run_replay(file, PoolConfig::default()).unwrap();
        let order: Vec<JobId> = report
            .chunks
            .iter()
            .filter(|c| c.is_terminal())
            .map(ResultChunk::id)
            .collect();
        assert_eq!(order, vec![2, 1, 3]);
        assert_eq!(report.metrics.jobs.completed, 4);
    }

    #[test]
    fn test_replay_cancel_and_close() {
        let file = replay(json!({
            "engine": {
                "methods": {
                    "get_blame": [{"step": "final", "payload": []}]
                }
            },
            "jobs": [
                {"id": 1, "method": "get_blame", "priority": 3, "cancel": true},
                {"id": 2, "method": "get_blame", "priority": 2, "close": true},
                {"id": 3, "method": "get_blame", "priority": 1}
            ]
        }));

        let report = run_replay(file, PoolConfig::default()).unwrap();
        assert_eq!(
            report.chunks,
            vec![
                ResultChunk::error(1, "Job cancelled"),
                ResultChunk::complete(3, json!([])),
            ]
        );
        assert_eq!(report.metrics.jobs.cancelled, 1);
    }

    #[test]
    fn test_hold_id_avoids_batch_ids() {
        let jobs = |ids: &[JobId]| -> Vec<ReplayJob> {
            ids.iter()
                .map(|&id| ReplayJob {
                    id,
                    method: "get_commit".to_string(),
                    priority: None,
                    params: Vec::new(),
                    cancel: false,
                    close: false,
                })
                .collect()
        };

        assert_eq!(hold_job_id(&[]), 0);
        assert_eq!(hold_job_id(&jobs(&[3, 1])), 4);
        assert_eq!(hold_job_id(&jobs(&[JobId::MAX, 0, 1])), 2);
    }

    #[test]
    fn test_replay_with_max_job_id() {
        let file = replay(json!({
            "engine": {
                "methods": {
                    "get_commit": [{"step": "final", "payload": "c"}]
                }
            },
            "jobs": [
                {"id": u64::MAX, "method": "get_commit", "priority": 1}
            ]
        }));

        let report = run_replay(file, PoolConfig::default()).unwrap();
        assert_eq!(report.chunks, vec![ResultChunk::complete(u64::MAX, json!("c"))]);
    }

    #[test]
    fn test_replay_boot_failure() {
        let file = replay(json!({
            "engine": {"refuse_boot": "not a git repository"},
            "jobs": []
        }));

        let err = run_replay(file, PoolConfig::default()).unwrap_err();
        assert!(matches!(err.root(), PoolError::BootFailed(_)));
    }
}
