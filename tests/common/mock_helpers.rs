//! Pool construction helpers

use super::test_timeout;
use explorer_pool::engine::{Gate, ScriptedEngine};
use explorer_pool::{Job, JobId, Origin, Pool, PoolConfig, RecordingOrigin};
use std::sync::Arc;

/// Snapshot bytes every test boots with
pub const TEST_SNAPSHOT: &[u8] = b"test-repo";

/// Method tests use to keep the engine busy
pub const BLOCKER: &str = "get_blame";

/// Create a booted pool with the default configuration
pub fn create_test_pool(engine: ScriptedEngine) -> Pool {
    create_test_pool_with(engine, PoolConfig::default())
}

/// Create a booted pool with a custom configuration
pub fn create_test_pool_with(engine: ScriptedEngine, config: PoolConfig) -> Pool {
    let pool = Pool::new(Box::new(engine), config);
    pool.boot(TEST_SNAPSHOT).expect("test engine should boot");
    pool
}

/// Submit a job that occupies the engine until `gate` is released
///
/// Returns once the engine has started the call, so everything submitted
/// afterwards is queued behind it.
pub fn occupy_engine(pool: &Pool, gate: &Gate, id: JobId, origin: Arc<dyn Origin>) {
    pool.execute(Job::new(id, BLOCKER).with_priority(i64::MAX), origin)
        .expect("blocker should be accepted");
    assert!(
        gate.wait_started(test_timeout()),
        "Engine should start the blocking call"
    );
}

/// Submit a job bound to a shared recorder
pub fn submit(pool: &Pool, origin: &Arc<RecordingOrigin>, id: JobId, method: &str, priority: i64) {
    pool.execute(
        Job::new(id, method).with_priority(priority),
        origin.clone(),
    )
    .expect("job should be accepted");
}
