//! Result origins
//!
//! An origin is the sink a job's result chunks are delivered to. The router
//! never knows what sits behind it: a channel to a UI thread, a callback, or
//! a recorder in a test.
//!
//! # Contract
//!
//! - `send` should return promptly; other jobs' chunks queue up behind it
//! - `send` and `close` run without the pool lock held, so they may call back
//!   into the pool; a panic drops that job's binding and nothing else
//! - an origin may receive zero chunks (closed before anything arrived)
//! - sends after `close` for the same job are no-ops, never errors

use crate::types::{JobId, ResultChunk};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Sink for a job's result chunks
///
/// One origin may serve several jobs; `close` names the job whose stream
/// has ended.
#[cfg_attr(test, mockall::automock)]
pub trait Origin: Send + Sync {
    /// Deliver one chunk
    fn send(&self, chunk: ResultChunk);

    /// The binding for `id` has been torn down; no further chunks follow
    fn close(&self, id: JobId) {
        let _ = id;
    }
}

/// Origin backed by a crossbeam channel, serving a single job
pub struct ChannelOrigin {
    sender: Sender<ResultChunk>,
    closed: AtomicBool,
}

impl ChannelOrigin {
    /// Create an origin and the receiver its chunks arrive on
    pub fn pair() -> (Self, Receiver<ResultChunk>) {
        let (sender, receiver) = unbounded();
        (
            Self {
                sender,
                closed: AtomicBool::new(false),
            },
            receiver,
        )
    }

    /// Whether the job's stream has ended
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Origin for ChannelOrigin {
    fn send(&self, chunk: ResultChunk) {
        if self.is_closed() {
            return;
        }
        // A dropped receiver means the caller stopped listening
        let _ = self.sender.send(chunk);
    }

    fn close(&self, _id: JobId) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Origin that forwards chunks to a closure
pub struct CallbackOrigin<F>
where
    F: Fn(ResultChunk) + Send + Sync,
{
    callback: F,
    closed: Mutex<HashSet<JobId>>,
}

impl<F> CallbackOrigin<F>
where
    F: Fn(ResultChunk) + Send + Sync,
{
    /// Wrap a callback
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            closed: Mutex::new(HashSet::new()),
        }
    }
}

impl<F> Origin for CallbackOrigin<F>
where
    F: Fn(ResultChunk) + Send + Sync,
{
    fn send(&self, chunk: ResultChunk) {
        let closed = self
            .closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&chunk.id());
        if !closed {
            (self.callback)(chunk);
        }
    }

    fn close(&self, id: JobId) {
        self.closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
    }
}

#[derive(Debug, Default)]
struct Recording {
    chunks: Vec<ResultChunk>,
    closed: HashSet<JobId>,
}

/// Origin that records everything it receives, in delivery order
///
/// Shared by many jobs in replays and tests. Waiters are woken through a
/// condition variable whenever a chunk arrives or a job closes.
#[derive(Debug, Default)]
pub struct RecordingOrigin {
    recording: Mutex<Recording>,
    changed: Condvar,
}

impl RecordingOrigin {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recording> {
        self.recording.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every recorded chunk
    pub fn chunks(&self) -> Vec<ResultChunk> {
        self.lock().chunks.clone()
    }

    /// Chunks recorded for one job
    pub fn chunks_for(&self, id: JobId) -> Vec<ResultChunk> {
        self.lock()
            .chunks
            .iter()
            .filter(|c| c.id() == id)
            .cloned()
            .collect()
    }

    /// Job ids in the order their terminal chunks arrived
    pub fn terminal_order(&self) -> Vec<JobId> {
        self.lock()
            .chunks
            .iter()
            .filter(|c| c.is_terminal())
            .map(ResultChunk::id)
            .collect()
    }

    /// Whether the binding for `id` has been torn down
    pub fn is_closed(&self, id: JobId) -> bool {
        self.lock().closed.contains(&id)
    }

    /// Wait until at least `count` terminal chunks have arrived
    pub fn wait_for_terminals(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |r| {
            r.chunks.iter().filter(|c| c.is_terminal()).count() >= count
        })
    }

    /// Wait until the job's terminal chunk has arrived
    pub fn wait_for_terminal(&self, id: JobId, timeout: Duration) -> bool {
        self.wait_until(timeout, |r| {
            r.chunks.iter().any(|c| c.id() == id && c.is_terminal())
        })
    }

    fn wait_until<P>(&self, timeout: Duration, predicate: P) -> bool
    where
        P: Fn(&Recording) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut recording = self.lock();
        loop {
            if predicate(&recording) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            recording = self
                .changed
                .wait_timeout(recording, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Origin for RecordingOrigin {
    fn send(&self, chunk: ResultChunk) {
        let mut recording = self.lock();
        if recording.closed.contains(&chunk.id()) {
            return;
        }
        recording.chunks.push(chunk);
        drop(recording);
        self.changed.notify_all();
    }

    fn close(&self, id: JobId) {
        self.lock().closed.insert(id);
        self.changed.notify_all();
    }
}
