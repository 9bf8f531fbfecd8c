//! Integration tests for replay sessions
//!
//! These tests run the fixture session end to end:
//! - Config loading from TOML
//! - Replay file parsing
//! - Dispatch order and per-job chunk streams

#![cfg(feature = "mock-engine")]

mod common;

use common::{assert_well_formed, error_message};
use explorer_pool::config::PoolConfig;
use explorer_pool::replay::{run_replay, ReplayFile};
use explorer_pool::{JobId, ResultChunk};
use serde_json::json;
use std::path::PathBuf;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn chunks_for(chunks: &[ResultChunk], id: JobId) -> Vec<ResultChunk> {
    chunks.iter().filter(|c| c.id() == id).cloned().collect()
}

#[test]
fn test_fixture_session() {
    let config = PoolConfig::load(fixture("pool.toml")).unwrap();
    assert_eq!(config.scheduler.dispatch_floor, Some(-1));
    assert_eq!(config.messages.faulted, "Engine faulted");

    let replay = ReplayFile::load(fixture("blame_session.json")).unwrap();
    assert_eq!(replay.jobs.len(), 6);

    let report = run_replay(replay, config).unwrap();

    let order: Vec<JobId> = report
        .chunks
        .iter()
        .filter(|c| c.is_terminal())
        .map(ResultChunk::id)
        .collect();
    assert_eq!(order, vec![6, 3, 5, 4, 1, 2]);

    for id in 1..=6 {
        assert_well_formed(&chunks_for(&report.chunks, id));
    }

    assert_eq!(error_message(&chunks_for(&report.chunks, 6)[0]), "Request cancelled");

    let authors = chunks_for(&report.chunks, 1);
    assert_eq!(authors.len(), 3);
    assert_eq!(error_message(&authors[2]), "pack file truncated");

    assert_eq!(
        chunks_for(&report.chunks, 2),
        vec![
            ResultChunk::partial(2, json!({"line": 1, "sha": "4b825dc"})),
            ResultChunk::complete(2, json!({"lines": 1})),
        ]
    );

    let metrics = report.metrics;
    assert_eq!(metrics.jobs.cancelled, 1);
    assert_eq!(metrics.jobs.failed, 1);
    // Four replay jobs plus the hold job
    assert_eq!(metrics.jobs.completed, 5);
}

#[test]
fn test_missing_replay_file() {
    let err = ReplayFile::load(fixture("does_not_exist.json")).unwrap_err();
    assert!(err.to_string().contains("Failed to read replay"));
}

#[test]
fn test_malformed_replay_file() {
    let err = ReplayFile::from_json_str(r#"{"jobs": [{"id": "one"}]}"#).unwrap_err();
    assert!(err.to_string().starts_with("Serialization error"));
}
