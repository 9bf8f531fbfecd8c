//! Execution loop
//!
//! The loop runs on the pool's worker thread and is the only code that ever
//! touches the engine. It pops the highest-priority job, drives the engine
//! call, and hands every chunk to the router as soon as it is produced.
//!
//! # States
//!
//! - **Idle**: nothing executing; pop the next job or block on the wake channel
//! - **Dispatching**: a job was popped, the engine is about to be called
//! - **Executing**: the engine call is in progress
//!
//! # Failures
//!
//! A per-call failure becomes a synthetic `Error` chunk for the active job and
//! the loop moves on. A fatal fault (or a panic inside the engine) faults the
//! whole pool: every pending and bound job receives an `Error` chunk and the
//! loop exits, leaving the engine for a reboot.

use super::metrics::{Lifecycle, LoopState};
use super::router::RouteOutcome;
use super::{panic_message, PoolState, Shared, Signal};
use crate::engine::{Engine, EngineRequest};
use crate::error::EngineError;
use crate::types::{Job, JobId, ResultChunk};
use crossbeam_channel::Receiver;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// What the loop should do next
enum Next {
    /// Run this job
    Run(Job),
    /// Nothing dispatchable; block until woken
    Wait,
    /// The pool is no longer running
    Stop,
}

/// How an engine call ended
#[derive(Debug)]
enum CallOutcome {
    /// A final data chunk was produced and routed
    Completed(RouteOutcome),
    /// The call failed
    Failed(EngineError),
    /// The stream ended without a final chunk
    Incomplete,
}

/// The single consumer of the job queue
pub(crate) struct ExecutionLoop {
    /// Engine instance, owned exclusively by the loop
    engine: Box<dyn Engine>,
    /// State shared with the façade
    shared: Arc<Shared>,
    /// Wake and shutdown signals from the façade
    signals: Receiver<Signal>,
}

impl ExecutionLoop {
    /// Create a loop around an engine
    pub(crate) fn new(engine: Box<dyn Engine>, shared: Arc<Shared>, signals: Receiver<Signal>) -> Self {
        Self {
            engine,
            shared,
            signals,
        }
    }

    /// Boot the engine, disposing a previous instance first
    pub(crate) fn boot(&mut self, snapshot: &[u8]) -> Result<(), EngineError> {
        if self.engine.is_booted() {
            tracing::debug!("Disposing engine {} before reboot", self.engine.name());
            self.engine.dispose();
        }
        self.engine.boot(snapshot)
    }

    /// Dispose the engine if it is still booted
    pub(crate) fn release(&mut self) {
        if self.engine.is_booted() {
            self.engine.dispose();
            tracing::info!("Engine {} released", self.engine.name());
        }
    }

    /// Run until the pool stops running
    pub(crate) fn run(&mut self) {
        tracing::info!("Execution loop started (engine: {})", self.engine.name());

        loop {
            match self.next_job() {
                Next::Run(job) => self.execute(job),
                Next::Wait => match self.signals.recv() {
                    Ok(Signal::Wake) => continue,
                    Ok(Signal::Shutdown) | Err(_) => break,
                },
                Next::Stop => break,
            }
        }

        // A faulted engine is kept for the reboot to dispose
        if self.shared.lock().lifecycle == Lifecycle::Disposed {
            self.release();
        }

        tracing::info!("Execution loop stopped");
    }

    /// Pop the next dispatchable job
    fn next_job(&self) -> Next {
        let mut state = self.shared.lock();
        if state.lifecycle != Lifecycle::Running {
            return Next::Stop;
        }

        match state
            .queue
            .pop_highest_above(self.shared.config.scheduler.dispatch_floor)
        {
            Some(job) => {
                state.loop_state = LoopState::Dispatching;
                Next::Run(job)
            }
            None => Next::Wait,
        }
    }

    /// Run one job to its terminal chunk
    fn execute(&mut self, job: Job) {
        let id = job.id;
        tracing::debug!("Dispatching job {}", job);

        let request = EngineRequest::from(job);
        self.shared.lock().loop_state = LoopState::Executing;

        let started = Instant::now();
        let outcome = drive_call(self.engine.as_mut(), &request, id, &self.shared);
        let elapsed_us = started.elapsed().as_micros() as u64;

        let mut state = self.shared.lock();
        match outcome {
            CallOutcome::Completed(routed) => {
                state.calls.record_success(elapsed_us);
                count_terminal(&mut state, routed, false);
                tracing::debug!("Job {} completed in {} us", id, elapsed_us);
            }
            CallOutcome::Failed(error) if error.is_fatal() => {
                state.calls.record_failure();
                let bound = state.router.is_bound(id);
                self.fault(&mut state, id, &error);
                let routed = if bound {
                    RouteOutcome::Terminated
                } else {
                    RouteOutcome::Dropped
                };
                count_terminal(&mut state, routed, true);
            }
            CallOutcome::Failed(error) => {
                state.calls.record_failure();
                tracing::warn!("Job {} failed: {}", id, error);
                let routed = state.deliver(ResultChunk::error(id, error.message()));
                count_terminal(&mut state, routed, true);
            }
            CallOutcome::Incomplete => {
                state.calls.record_failure();
                let message = self.shared.config.messages.incomplete.clone();
                tracing::warn!("Job {}: {}", id, message);
                let routed = state.deliver(ResultChunk::error(id, message));
                count_terminal(&mut state, routed, true);
            }
        }

        state.queue.complete(id);
        state.loop_state = LoopState::Idle;
        self.shared.hand_off(state);
    }

    /// Move the pool to Faulted and end every outstanding job
    fn fault(&self, state: &mut PoolState, id: JobId, error: &EngineError) {
        tracing::error!(
            "Engine {} faulted while running job {}: {}",
            self.engine.name(),
            id,
            error
        );

        if state.lifecycle == Lifecycle::Disposed {
            return;
        }

        state.lifecycle = Lifecycle::Faulted;
        state.fault = Some(error.message().to_string());

        let drained = state.queue.drain();
        state.counters.cancelled += drained.len() as u64;

        let message = format!("{}: {}", self.shared.config.messages.faulted, error.message());
        let failed = state.fail_all(&message);
        tracing::info!(
            "Pool faulted; {} pending jobs dropped, {} origins failed",
            drained.len(),
            failed
        );
    }
}

/// Count a finished job by where its terminal chunk went
fn count_terminal(state: &mut PoolState, routed: RouteOutcome, failed: bool) {
    match routed {
        RouteOutcome::Dropped => state.counters.discarded += 1,
        _ if failed => state.counters.failed += 1,
        _ => state.counters.completed += 1,
    }
}

/// Run engine code, turning a panic into a fatal error
fn guarded<T>(f: impl FnOnce() -> Result<T, EngineError>) -> Result<T, EngineError> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|panic| {
        Err(EngineError::Fatal(format!(
            "engine panicked: {}",
            panic_message(panic.as_ref())
        )))
    })
}

/// Call the engine and route its chunks until the job resolves
///
/// Only the engine runs under the panic guard; chunks are routed and
/// flushed outside it, so an origin cannot fault the engine.
fn drive_call(
    engine: &mut dyn Engine,
    request: &EngineRequest,
    id: JobId,
    shared: &Shared,
) -> CallOutcome {
    let mut stream = match guarded(move || engine.call(request)) {
        Ok(stream) => stream,
        Err(error) => return CallOutcome::Failed(error),
    };

    loop {
        let item = match guarded(|| Ok(stream.next())) {
            Ok(Some(item)) => item,
            Ok(None) => return CallOutcome::Incomplete,
            Err(error) => return CallOutcome::Failed(error),
        };

        match item {
            Ok(chunk) if chunk.is_final => {
                let mut state = shared.lock();
                let routed = state.deliver(ResultChunk::complete(id, chunk.payload));
                shared.hand_off(state);
                return CallOutcome::Completed(routed);
            }
            Ok(chunk) => {
                let mut state = shared.lock();
                state.deliver(ResultChunk::partial(id, chunk.payload));
                shared.hand_off(state);
            }
            Err(error) => return CallOutcome::Failed(error),
        }
    }
}
