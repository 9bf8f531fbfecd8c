//! Job pool in front of the single-threaded engine
//!
//! The pool serializes every engine call through one worker thread while any
//! number of callers submit, reprioritize, cancel and detach jobs from their
//! own threads.
//!
//! # Architecture
//!
//! - [`JobQueue`] - Pending jobs ordered by priority, FIFO among equals
//! - [`ResultRouter`] - Job id → [`Origin`] bindings, exactly-once termination
//! - `ExecutionLoop` - The worker: pops, calls the engine, routes chunks
//! - [`Pool`] - The façade callers use
//!
//! Queue, router and lifecycle live behind a single mutex shared by the
//! façade and the worker. The worker blocks on a bounded crossbeam channel
//! when there is nothing to run; producers push a wake signal after every
//! change that can make a job dispatchable.
//!
//! Origins never run under that mutex. Routed chunks queue in an outbox and
//! are handed over once the lock is released, in routing order, so an
//! origin may call straight back into the pool.
//!
//! # Example
//!
//! ```ignore
//! use explorer_pool::{Pool, PoolConfig, ChannelOrigin, Job};
//!
//! let pool = Pool::new(Box::new(engine), PoolConfig::default());
//! pool.boot(&snapshot)?;
//!
//! let (origin, results) = ChannelOrigin::pair();
//! pool.execute(Job::new(1, "get_branches").with_priority(10), Arc::new(origin))?;
//!
//! for chunk in results.iter() {
//!     if chunk.is_terminal() {
//!         break;
//!     }
//! }
//!
//! pool.dispose()?;
//! ```

pub mod handle;
pub mod metrics;
pub mod origin;
mod outbox;
pub mod queue;
pub mod router;
mod worker;

pub use handle::{JobHandle, JobResults};
pub use metrics::{CallStats, JobCounters, Lifecycle, LoopState, PoolMetrics};
pub use origin::{CallbackOrigin, ChannelOrigin, Origin, RecordingOrigin};
pub use queue::JobQueue;
pub use router::{Delivery, ResultRouter, RouteOutcome};

use crate::config::PoolConfig;
use crate::engine::Engine;
use crate::error::{PoolError, Result};
use crate::types::{EngineMethod, Job, JobId, QueueCommand, ResultChunk};
use crossbeam_channel::{bounded, Sender};
use outbox::Outbox;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use worker::ExecutionLoop;

const WORKER_THREAD_NAME: &str = "explorer-pool-worker";

/// Signals from the façade to the execution loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    /// Something may have become dispatchable
    Wake,
    /// The pool was disposed
    Shutdown,
}

/// Everything guarded by the pool lock
#[derive(Debug, Default)]
pub(crate) struct PoolState {
    pub(crate) queue: JobQueue,
    pub(crate) router: ResultRouter,
    pub(crate) outbox: Outbox,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) loop_state: LoopState,
    pub(crate) fault: Option<String>,
    pub(crate) counters: JobCounters,
    pub(crate) calls: CallStats,
}

impl PoolState {
    /// Route a chunk, count the outcome and queue it for delivery
    pub(crate) fn deliver(&mut self, chunk: ResultChunk) -> RouteOutcome {
        let id = chunk.id();
        let Some(delivery) = self.router.route(chunk) else {
            self.counters.chunks_dropped += 1;
            return RouteOutcome::Dropped;
        };

        let outcome = delivery.outcome();
        self.counters.chunks_delivered += 1;
        if outcome == RouteOutcome::Terminated {
            tracing::debug!("Routed terminal chunk for job {}", id);
        }
        self.outbox.push(delivery);
        outcome
    }

    /// Queue a terminal error for every bound job; returns how many
    pub(crate) fn fail_all(&mut self, message: &str) -> usize {
        let deliveries = self.router.fail_all(message);
        let failed = deliveries.len();
        self.counters.chunks_delivered += failed as u64;
        for delivery in deliveries {
            self.outbox.push(delivery);
        }
        failed
    }

    /// Unbind a job's origin and queue its close notice
    fn close_binding(&mut self, id: JobId) -> bool {
        match self.router.unbind(id) {
            Some(delivery) => {
                self.outbox.push(delivery);
                true
            }
            None => false,
        }
    }

    /// Cut off an origin that panicked; its queued chunks are dropped
    fn forget_origin(&mut self, id: JobId) {
        self.router.forget(id);
        let dropped = self.outbox.discard(id) as u64;
        self.counters.chunks_delivered = self.counters.chunks_delivered.saturating_sub(dropped);
        self.counters.chunks_dropped += dropped;
    }

    /// Fail unless new jobs are accepted
    fn ensure_accepting(&self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Running => Ok(()),
            Lifecycle::Created => Err(PoolError::NotBooted),
            Lifecycle::Faulted => Err(PoolError::PoolFaulted(
                self.fault.clone().unwrap_or_default(),
            )),
            Lifecycle::Disposed => Err(PoolError::PoolDisposed),
        }
    }

    /// Fail once the pool is disposed
    fn ensure_not_disposed(&self) -> Result<()> {
        if self.lifecycle == Lifecycle::Disposed {
            Err(PoolError::PoolDisposed)
        } else {
            Ok(())
        }
    }
}

/// State shared by the façade and the execution loop
pub(crate) struct Shared {
    state: Mutex<PoolState>,
    /// Signalled whenever a drainer finishes
    drained: Condvar,
    pub(crate) config: PoolConfig,
}

impl Shared {
    pub(crate) fn new(config: PoolConfig) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            drained: Condvar::new(),
            config,
        }
    }

    /// Lock the pool state
    ///
    /// A panic on another thread must not wedge every later caller, so
    /// poisoning is ignored.
    pub(crate) fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the lock and run every delivery queued so far
    ///
    /// Returns once they have all reached their origins. Called from inside
    /// an origin on the draining thread, it returns at once; the running
    /// drain picks the new deliveries up after the origin returns.
    pub(crate) fn flush<'a>(&'a self, mut state: MutexGuard<'a, PoolState>) {
        let me = thread::current().id();
        let mark = state.outbox.mark();

        while !state.outbox.reached(mark) {
            match state.outbox.drainer() {
                Some(drainer) if drainer == me => return,
                Some(_) => {
                    state = self
                        .drained
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                None => state = self.drain(state),
            }
        }
    }

    /// Like [`flush`](Self::flush), but never waits: deliveries queued while
    /// another thread drains are left to that thread
    ///
    /// The worker uses this so that an origin joining the worker (a reboot
    /// from a fault handler) can never wait on a worker that waits on it.
    pub(crate) fn hand_off(&self, state: MutexGuard<'_, PoolState>) {
        if state.outbox.drainer().is_none() {
            drop(self.drain(state));
        }
    }

    fn drain<'a>(&'a self, mut state: MutexGuard<'a, PoolState>) -> MutexGuard<'a, PoolState> {
        state.outbox.claim(thread::current().id());

        while let Some(delivery) = state.outbox.start_next() {
            drop(state);
            let id = delivery.id();
            let result = catch_unwind(AssertUnwindSafe(|| delivery.run()));
            state = self.lock();
            state.outbox.finish();

            if let Err(panic) = result {
                tracing::error!(
                    "Origin for job {} panicked; dropping its binding: {}",
                    id,
                    panic_message(panic.as_ref())
                );
                state.forget_origin(id);
            }
        }

        state.outbox.release();
        self.drained.notify_all();
        state
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Worker thread handle; `None` if the loop never ran
type WorkerHandle = JoinHandle<Option<ExecutionLoop>>;

/// Body of the worker thread
type WorkerMain = Box<dyn FnOnce() -> Option<ExecutionLoop> + Send>;

/// Where the execution loop currently lives
enum WorkerSlot {
    /// Not running; booted or not
    Parked(ExecutionLoop),
    /// Running on the worker thread
    Running(WorkerHandle),
    /// Another caller is joining the worker thread
    Joining,
    /// Gone for good (disposed and released)
    Released,
}

fn is_current(handle: &WorkerHandle) -> bool {
    handle.thread().id() == thread::current().id()
}

struct PoolInner {
    shared: Arc<Shared>,
    // Lock order: worker slot before pool state. Never held across a join
    // or a flush.
    worker: Mutex<WorkerSlot>,
    wake: Sender<Signal>,
    next_id: AtomicU64,
}

impl PoolInner {
    fn lock_worker(&self) -> MutexGuard<'_, WorkerSlot> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        // A full channel already holds a pending wake
        let _ = self.wake.try_send(Signal::Wake);
    }

    /// Shared by `Pool::dispose` and `Drop`
    fn dispose(&self) -> Result<()> {
        let mut slot = self.lock_worker();
        let mut state = self.shared.lock();
        state.ensure_not_disposed()?;

        let was_faulted = state.lifecycle == Lifecycle::Faulted;
        state.lifecycle = Lifecycle::Disposed;

        let drained = state.queue.drain();
        state.counters.cancelled += drained.len() as u64;
        let failed = state.fail_all(&self.shared.config.messages.disposed);
        drop(state);

        let _ = self.wake.try_send(Signal::Shutdown);
        tracing::info!(
            "Pool disposed; {} pending jobs dropped, {} origins failed",
            drained.len(),
            failed
        );

        let stopped = match std::mem::replace(&mut *slot, WorkerSlot::Released) {
            WorkerSlot::Parked(mut exec) => {
                exec.release();
                None
            }
            // The loop already exited on the fault and kept the engine
            WorkerSlot::Running(handle) if was_faulted && !is_current(&handle) => Some(handle),
            // A running loop releases the engine itself on its way out
            other @ (WorkerSlot::Running(_) | WorkerSlot::Joining) => {
                *slot = other;
                None
            }
            WorkerSlot::Released => None,
        };
        drop(slot);

        self.shared.flush(self.shared.lock());

        if let Some(handle) = stopped {
            match handle.join() {
                Ok(Some(mut exec)) => exec.release(),
                Ok(None) => {}
                Err(_) => tracing::error!("Worker thread panicked"),
            }
        }
        Ok(())
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if self.shared.lock().lifecycle != Lifecycle::Disposed {
            let _ = self.dispose();
        }
    }
}

/// Priority job pool over one engine instance
///
/// Cloning is cheap; all clones drive the same pool. The pool is disposed
/// when the last clone is dropped.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.shared.lock();
        f.debug_struct("Pool")
            .field("lifecycle", &state.lifecycle)
            .field("loop_state", &state.loop_state)
            .field("pending", &state.queue.len())
            .finish()
    }
}

impl Pool {
    /// Create a pool around an engine; call [`boot`](Self::boot) before use
    pub fn new(engine: Box<dyn Engine>, config: PoolConfig) -> Self {
        let capacity = config.scheduler.wake_capacity.max(1);
        let (wake_tx, wake_rx) = bounded(capacity);
        let shared = Arc::new(Shared::new(config));
        let exec = ExecutionLoop::new(engine, shared.clone(), wake_rx);

        Self {
            inner: Arc::new(PoolInner {
                shared,
                worker: Mutex::new(WorkerSlot::Parked(exec)),
                wake: wake_tx,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Boot the engine and start the worker thread
    ///
    /// Also reboots a faulted pool: the old worker is joined and the engine is
    /// disposed and booted again with the new snapshot.
    pub fn boot(&self, snapshot: &[u8]) -> Result<()> {
        self.boot_with(snapshot, |main| {
            thread::Builder::new()
                .name(WORKER_THREAD_NAME.to_string())
                .spawn(main)
        })
    }

    fn boot_with<S>(&self, snapshot: &[u8], spawn: S) -> Result<()>
    where
        S: FnOnce(WorkerMain) -> io::Result<WorkerHandle>,
    {
        let mut slot = self.inner.lock_worker();
        self.ensure_bootable()?;

        let mut exec = match std::mem::replace(&mut *slot, WorkerSlot::Joining) {
            WorkerSlot::Parked(exec) => exec,
            WorkerSlot::Running(handle) if is_current(&handle) => {
                *slot = WorkerSlot::Running(handle);
                return Err(PoolError::BootFailed(
                    "cannot reboot from the worker thread".to_string(),
                ));
            }
            WorkerSlot::Running(handle) => {
                drop(slot);
                let joined = handle.join();
                slot = self.inner.lock_worker();
                match joined {
                    Ok(Some(exec)) => exec,
                    Ok(None) | Err(_) => {
                        *slot = WorkerSlot::Released;
                        return Err(PoolError::BootFailed("worker thread panicked".to_string()));
                    }
                }
            }
            WorkerSlot::Joining => {
                *slot = WorkerSlot::Joining;
                return Err(PoolError::BootFailed("worker is still stopping".to_string()));
            }
            WorkerSlot::Released => {
                *slot = WorkerSlot::Released;
                return Err(PoolError::BootFailed("engine already released".to_string()));
            }
        };

        // Disposed while the old worker was being joined
        if let Err(e) = self.ensure_bootable() {
            exec.release();
            *slot = WorkerSlot::Released;
            return Err(e);
        }

        if let Err(e) = exec.boot(snapshot) {
            tracing::error!("Engine boot failed: {}", e);
            *slot = WorkerSlot::Parked(exec);
            return Err(PoolError::BootFailed(e.message().to_string()));
        }

        {
            let mut state = self.inner.shared.lock();
            if state.lifecycle == Lifecycle::Faulted {
                tracing::info!("Rebooting faulted pool");
            }
            state.lifecycle = Lifecycle::Running;
            state.loop_state = LoopState::Idle;
            state.fault = None;
        }

        // Shared with the thread so a failed spawn hands the loop back
        let cell = Arc::new(Mutex::new(Some(exec)));
        let thread_cell = cell.clone();
        let main: WorkerMain = Box::new(move || {
            let taken = thread_cell
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            taken.map(|mut exec| {
                exec.run();
                exec
            })
        });

        match spawn(main) {
            Ok(handle) => {
                *slot = WorkerSlot::Running(handle);
                tracing::info!("Pool booted ({} snapshot bytes)", snapshot.len());
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to spawn worker thread: {}", e);
                {
                    let mut state = self.inner.shared.lock();
                    state.lifecycle = Lifecycle::Faulted;
                    state.fault = Some(format!("failed to spawn worker: {}", e));
                }
                let exec = cell.lock().unwrap_or_else(PoisonError::into_inner).take();
                *slot = match exec {
                    Some(exec) => WorkerSlot::Parked(exec),
                    None => WorkerSlot::Released,
                };
                Err(PoolError::Io(e))
            }
        }
    }

    fn ensure_bootable(&self) -> Result<()> {
        match self.inner.shared.lock().lifecycle {
            Lifecycle::Created | Lifecycle::Faulted => Ok(()),
            Lifecycle::Running => Err(PoolError::AlreadyBooted),
            Lifecycle::Disposed => Err(PoolError::PoolDisposed),
        }
    }

    /// Bind the origin and enqueue the job; results arrive through the origin
    pub fn execute(&self, job: Job, origin: Arc<dyn Origin>) -> Result<()> {
        if job.method.trim().is_empty() {
            return Err(PoolError::InvalidJob(format!("job {} has no method", job.id)));
        }

        {
            let mut state = self.inner.shared.lock();
            state.ensure_accepting()?;
            if state.queue.is_live(job.id) {
                return Err(PoolError::DuplicateId(job.id));
            }

            let id = job.id;
            state.router.bind(id, origin)?;
            if let Err(e) = state.queue.insert(job) {
                state.router.forget(id);
                return Err(e);
            }
            state.counters.submitted += 1;
            tracing::debug!("Job {} queued ({} pending)", id, state.queue.len());
        }

        self.inner.notify();
        Ok(())
    }

    /// Change a pending job's priority; a no-op for executing or unknown ids
    pub fn update(&self, id: JobId, priority: i64) -> Result<()> {
        self.reprioritize(id, priority).map(|_| ())
    }

    fn reprioritize(&self, id: JobId, priority: i64) -> Result<bool> {
        let changed = {
            let mut state = self.inner.shared.lock();
            state.ensure_not_disposed()?;
            state.queue.reprioritize(id, priority)
        };

        if changed {
            tracing::debug!("Job {} reprioritized to {}", id, priority);
            self.inner.notify();
        } else {
            tracing::trace!("Ignoring reprioritize of non-pending job {}", id);
        }
        Ok(changed)
    }

    /// Remove a job that has not started yet
    ///
    /// Returns true if the job was pending; its origin then receives a
    /// cancellation error. Executing and unknown jobs are left alone.
    pub fn cancel(&self, id: JobId) -> Result<bool> {
        let mut state = self.inner.shared.lock();
        state.ensure_not_disposed()?;

        let removed = state.queue.remove(id);
        match removed {
            Ok(_) => {
                state.counters.cancelled += 1;
                let message = self.inner.shared.config.messages.cancelled.clone();
                state.deliver(ResultChunk::error(id, message));
                tracing::debug!("Job {} cancelled", id);
                self.inner.shared.flush(state);
                Ok(true)
            }
            Err(PoolError::NotPending(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Detach a job's origin without stopping its work
    ///
    /// Returns whether an origin was bound. A pending job stays queued and its
    /// results are discarded when it runs.
    pub fn close_origin(&self, id: JobId) -> Result<bool> {
        let mut state = self.inner.shared.lock();
        state.ensure_not_disposed()?;
        let closed = state.close_binding(id);
        if closed {
            tracing::debug!("Origin for job {} closed", id);
        }
        self.inner.shared.flush(state);
        Ok(closed)
    }

    /// Apply a queue command; returns whether it took effect
    pub fn apply(&self, command: QueueCommand) -> Result<bool> {
        match command {
            QueueCommand::Submit(job, origin) => self.execute(job, origin).map(|_| true),
            QueueCommand::Reprioritize { id, priority } => self.reprioritize(id, priority),
            QueueCommand::Cancel(id) => self.cancel(id),
            QueueCommand::CloseOrigin(id) => self.close_origin(id),
        }
    }

    /// Fail every bound job, release the engine and refuse further work
    ///
    /// Does not wait for an in-flight engine call; see
    /// [`join_worker`](Self::join_worker).
    pub fn dispose(&self) -> Result<()> {
        self.inner.dispose()
    }

    /// Wait for a stopped worker thread to exit
    ///
    /// After `dispose` this waits for the in-flight call to finish and the
    /// engine to be released; after a fault it parks the engine for reboot.
    /// Returns false if there was no thread to join or the pool is running.
    pub fn join_worker(&self) -> bool {
        let mut slot = self.inner.lock_worker();
        let lifecycle = self.inner.shared.lock().lifecycle;
        if !matches!(lifecycle, Lifecycle::Disposed | Lifecycle::Faulted) {
            return false;
        }

        let handle = match std::mem::replace(&mut *slot, WorkerSlot::Joining) {
            WorkerSlot::Running(handle) if !is_current(&handle) => handle,
            other => {
                *slot = other;
                return false;
            }
        };
        drop(slot);

        let joined = handle.join();
        let mut slot = self.inner.lock_worker();
        // Re-read: the pool may have been disposed while we waited
        let lifecycle = self.inner.shared.lock().lifecycle;
        *slot = match joined {
            Ok(Some(exec)) if lifecycle == Lifecycle::Faulted => WorkerSlot::Parked(exec),
            Ok(Some(mut exec)) => {
                exec.release();
                WorkerSlot::Released
            }
            Ok(None) => WorkerSlot::Released,
            Err(_) => {
                tracing::error!("Worker thread panicked");
                WorkerSlot::Released
            }
        };
        true
    }

    /// Submit a job with a pool-assigned id and a channel origin
    ///
    /// Without an explicit priority, known engine methods get their default
    /// priority and anything else the configured default.
    pub fn submit(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
        priority: Option<i64>,
    ) -> Result<(JobHandle, JobResults)> {
        let method = method.into();
        let priority = priority.unwrap_or_else(|| self.default_priority_for(&method));

        loop {
            let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
            let (origin, receiver) = ChannelOrigin::pair();
            let job = Job::new(id, method.clone())
                .with_priority(priority)
                .with_params(params.clone());

            match self.execute(job, Arc::new(origin)) {
                Ok(()) => {
                    return Ok((
                        JobHandle::new(self.clone(), id, priority),
                        JobResults::new(id, receiver),
                    ))
                }
                // Id taken by a caller-assigned job
                Err(PoolError::DuplicateId(_)) | Err(PoolError::DuplicateBinding(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Priority a job for `method` gets when the caller does not choose one
    pub fn default_priority_for(&self, method: &str) -> i64 {
        let scheduler = &self.inner.shared.config.scheduler;
        EngineMethod::from_name(method)
            .map(|m| m.default_priority(scheduler.default_priority, scheduler.stream_priority))
            .unwrap_or(scheduler.default_priority)
    }

    /// Submit a known engine method with its default priority
    pub fn request(&self, method: EngineMethod, params: Vec<Value>) -> Result<(JobHandle, JobResults)> {
        self.submit(method.as_str(), params, None)
    }

    /// Current lifecycle state
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.shared.lock().lifecycle
    }

    /// Snapshot of queue, router and worker state
    pub fn metrics(&self) -> PoolMetrics {
        let state = self.inner.shared.lock();
        PoolMetrics {
            lifecycle: state.lifecycle,
            loop_state: state.loop_state,
            active_job: state.queue.active(),
            jobs_in_queue: state.queue.len(),
            bound_origins: state.router.len(),
            fault: state.fault.clone(),
            jobs: state.counters.clone(),
            calls: state.calls.clone(),
        }
    }

    /// Log the pending jobs and worker state
    pub fn debug_print(&self) {
        let state = self.inner.shared.lock();
        tracing::info!(
            "Pool {} / {}: {} pending, {} bound, active {:?}",
            state.lifecycle,
            state.loop_state,
            state.queue.len(),
            state.router.len(),
            state.queue.active()
        );
        for job in state.queue.pending() {
            tracing::info!("  {} bound={}", job, state.router.is_bound(job.id));
        }
    }
}

#[cfg(all(test, feature = "mock-engine"))]
mod tests {
    use super::*;
    use crate::engine::{ScriptStep, ScriptedEngine};
    use serde_json::json;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn create_test_pool(engine: ScriptedEngine) -> Pool {
        let pool = Pool::new(Box::new(engine), PoolConfig::default());
        pool.boot(b"repo").unwrap();
        pool
    }

    #[test]
    fn test_execute_requires_boot() {
        let pool = Pool::new(Box::new(ScriptedEngine::new()), PoolConfig::default());
        let origin = Arc::new(RecordingOrigin::new());

        assert!(matches!(
            pool.execute(Job::new(1, "get_branches"), origin),
            Err(PoolError::NotBooted)
        ));
    }

    #[test]
    fn test_boot_twice() {
        let pool = create_test_pool(ScriptedEngine::new());
        assert!(matches!(pool.boot(b"repo"), Err(PoolError::AlreadyBooted)));
    }

    #[test]
    fn test_boot_failure_keeps_pool_created() {
        let pool = Pool::new(
            Box::new(ScriptedEngine::new().refusing_boot("bad snapshot")),
            PoolConfig::default(),
        );
        match pool.boot(b"repo") {
            Err(PoolError::BootFailed(msg)) => assert_eq!(msg, "bad snapshot"),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(pool.lifecycle(), Lifecycle::Created);
    }

    #[test]
    fn test_invalid_job() {
        let pool = create_test_pool(ScriptedEngine::new());
        let origin = Arc::new(RecordingOrigin::new());
        assert!(matches!(
            pool.execute(Job::new(1, "  "), origin),
            Err(PoolError::InvalidJob(_))
        ));
    }

    #[test]
    fn test_submit_and_collect() {
        let pool = create_test_pool(ScriptedEngine::new().with_script(
            "stream_authors",
            vec![
                ScriptStep::data(json!("ada")),
                ScriptStep::data(json!("grace")),
                ScriptStep::last(json!(2)),
            ],
        ));

        let (handle, results) = pool.request(EngineMethod::StreamAuthors, Vec::new()).unwrap();
        assert_eq!(handle.priority(), 1);

        let outcome = results.collect(WAIT).unwrap();
        assert_eq!(outcome.partials, vec![json!("ada"), json!("grace")]);
        assert_eq!(outcome.result, Ok(json!(2)));
    }

    #[test]
    fn test_submit_skips_caller_assigned_ids() {
        let mut engine = ScriptedEngine::new()
            .with_script("get_blame", vec![ScriptStep::last(json!([]))]);
        let gate = engine.gate("get_blame");
        let pool = create_test_pool(engine);

        let origin = Arc::new(RecordingOrigin::new());
        pool.execute(Job::new(1, "get_blame"), origin).unwrap();

        let (handle, _results) = pool.submit("get_blame", Vec::new(), Some(5)).unwrap();
        assert_eq!(handle.id(), 2);
        drop(gate);
    }

    #[test]
    fn test_apply_commands() {
        let mut engine =
            ScriptedEngine::new().with_script("get_blame", vec![ScriptStep::last(json!([]))]);
        let gate = engine.gate("get_blame");
        let pool = create_test_pool(engine);
        let origin = Arc::new(RecordingOrigin::new());

        assert!(pool
            .apply(QueueCommand::Submit(Job::new(1, "get_blame"), origin.clone()))
            .unwrap());
        assert!(gate.wait_started(WAIT));

        pool.apply(QueueCommand::Submit(Job::new(2, "get_blame"), origin.clone()))
            .unwrap();
        assert!(pool
            .apply(QueueCommand::Reprioritize { id: 2, priority: 9 })
            .unwrap());
        assert!(!pool
            .apply(QueueCommand::Reprioritize { id: 1, priority: 9 })
            .unwrap());
        assert!(pool.apply(QueueCommand::Cancel(2)).unwrap());
        assert!(pool.apply(QueueCommand::CloseOrigin(1)).unwrap());
        assert!(!pool.apply(QueueCommand::CloseOrigin(1)).unwrap());

        gate.release();
        assert!(origin.wait_for_terminal(2, WAIT));
        assert_eq!(origin.chunks_for(1).len(), 0);
    }

    #[test]
    fn test_failed_spawn_keeps_engine_for_reboot() {
        let pool = Pool::new(
            Box::new(
                ScriptedEngine::new()
                    .with_script("get_branches", vec![ScriptStep::last(json!(["main"]))]),
            ),
            PoolConfig::default(),
        );

        let err = pool
            .boot_with(b"repo", |_main| {
                Err(io::Error::new(io::ErrorKind::Other, "no threads left"))
            })
            .unwrap_err();
        assert!(matches!(err, PoolError::Io(_)));
        assert_eq!(pool.lifecycle(), Lifecycle::Faulted);
        assert!(pool.metrics().fault.unwrap().contains("no threads left"));

        pool.boot(b"repo").unwrap();
        let (_handle, results) = pool.submit("get_branches", Vec::new(), None).unwrap();
        assert_eq!(results.collect(WAIT).unwrap().result, Ok(json!(["main"])));
    }

    #[test]
    fn test_flush_waits_for_another_drainer() {
        let shared = Arc::new(Shared::new(PoolConfig::default()));
        let origin = Arc::new(RecordingOrigin::new());

        // Pretend another thread is mid-drain
        let other = thread::spawn(|| thread::current().id()).join().unwrap();
        {
            let mut state = shared.lock();
            state.router.bind(1, origin.clone()).unwrap();
            state.deliver(ResultChunk::complete(1, json!(1)));
            state.outbox.claim(other);
        }

        let waiter = {
            let shared = shared.clone();
            thread::spawn(move || shared.flush(shared.lock()))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(origin.chunks().is_empty());

        // The drainer finishes without picking up the delivery
        {
            let mut state = shared.lock();
            state.outbox.release();
            shared.drained.notify_all();
        }
        waiter.join().unwrap();
        assert_eq!(origin.terminal_order(), vec![1]);
    }

    #[test]
    fn test_metrics_after_dispose() {
        let pool = create_test_pool(
            ScriptedEngine::new().with_script("get_branches", vec![ScriptStep::last(json!([]))]),
        );
        let (_handle, results) = pool.submit("get_branches", Vec::new(), None).unwrap();
        results.collect(WAIT).unwrap();

        pool.dispose().unwrap();
        assert!(matches!(pool.dispose(), Err(PoolError::PoolDisposed)));
        assert!(pool.join_worker());

        let metrics = pool.metrics();
        assert_eq!(metrics.lifecycle, Lifecycle::Disposed);
        assert_eq!(metrics.jobs.submitted, 1);
        assert_eq!(metrics.jobs.completed, 1);
        assert_eq!(metrics.calls.successful_calls, 1);
        assert!(!metrics.is_busy());
    }
}
