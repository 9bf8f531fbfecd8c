//! Caller-side handles for jobs started with [`Pool::submit`]
//!
//! [`JobHandle`] controls a queued job; [`JobResults`] reads its result
//! stream. They are split so the results can move to another thread while
//! the handle stays with the code that decides priorities.

use super::Pool;
use crate::error::{PoolError, Result};
use crate::types::{JobId, JobOutcome, ResultChunk};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Control handle for one submitted job
#[derive(Debug)]
pub struct JobHandle {
    pool: Pool,
    id: JobId,
    priority: AtomicI64,
}

impl JobHandle {
    pub(crate) fn new(pool: Pool, id: JobId, priority: i64) -> Self {
        Self {
            pool,
            id,
            priority: AtomicI64::new(priority),
        }
    }

    /// The job's id
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Last priority set through this handle
    pub fn priority(&self) -> i64 {
        self.priority.load(Ordering::SeqCst)
    }

    /// Change the job's priority; no effect once the job has started
    pub fn set_priority(&self, priority: i64) -> Result<()> {
        self.pool.update(self.id, priority)?;
        self.priority.store(priority, Ordering::SeqCst);
        Ok(())
    }

    /// Remove the job if it has not started; returns whether it was removed
    pub fn cancel(&self) -> Result<bool> {
        self.pool.cancel(self.id)
    }

    /// Stop receiving results without stopping the engine work
    pub fn close(&self) -> Result<bool> {
        self.pool.close_origin(self.id)
    }
}

/// Result stream of one submitted job
#[derive(Debug)]
pub struct JobResults {
    id: JobId,
    receiver: Receiver<ResultChunk>,
    finished: bool,
}

impl JobResults {
    pub(crate) fn new(id: JobId, receiver: Receiver<ResultChunk>) -> Self {
        Self {
            id,
            receiver,
            finished: false,
        }
    }

    /// The job's id
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Whether the terminal chunk has been received
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn observe(&mut self, chunk: ResultChunk) -> ResultChunk {
        if chunk.is_terminal() {
            self.finished = true;
        }
        chunk
    }

    /// Next chunk if one has already arrived
    pub fn try_next(&mut self) -> Result<Option<ResultChunk>> {
        if self.finished {
            return Ok(None);
        }
        match self.receiver.try_recv() {
            Ok(chunk) => Ok(Some(self.observe(chunk))),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(PoolError::OriginClosed(self.id)),
        }
    }

    /// Wait for the next chunk
    ///
    /// Returns `Ok(None)` once the terminal chunk has been received.
    pub fn next_timeout(&mut self, timeout: Duration) -> Result<Option<ResultChunk>> {
        if self.finished {
            return Ok(None);
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(chunk) => Ok(Some(self.observe(chunk))),
            Err(RecvTimeoutError::Timeout) => Err(PoolError::Timeout(format!(
                "no result for job {} within {:?}",
                self.id, timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(PoolError::OriginClosed(self.id)),
        }
    }

    /// Wait for the whole stream and gather it into a [`JobOutcome`]
    pub fn collect(mut self, timeout: Duration) -> Result<JobOutcome> {
        let deadline = Instant::now() + timeout;
        let mut partials: Vec<Value> = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(chunk) = self.next_timeout(remaining)? else {
                return Err(PoolError::OriginClosed(self.id));
            };

            match chunk {
                ResultChunk::Data {
                    payload,
                    is_final: false,
                    ..
                } => partials.push(payload),
                ResultChunk::Data { payload, .. } => {
                    return Ok(JobOutcome {
                        id: self.id,
                        partials,
                        result: Ok(payload),
                    })
                }
                ResultChunk::Error { message, .. } => {
                    return Ok(JobOutcome {
                        id: self.id,
                        partials,
                        result: Err(message),
                    })
                }
            }
        }
    }
}

impl Iterator for JobResults {
    type Item = ResultChunk;

    /// Blocks until the next chunk; ends after the terminal chunk or when the
    /// origin is closed
    fn next(&mut self) -> Option<ResultChunk> {
        if self.finished {
            return None;
        }
        let chunk = self.receiver.recv().ok()?;
        Some(self.observe(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use serde_json::json;

    #[test]
    fn test_collect_gathers_partials() {
        let (tx, rx) = unbounded();
        tx.send(ResultChunk::partial(1, json!("a"))).unwrap();
        tx.send(ResultChunk::partial(1, json!("b"))).unwrap();
        tx.send(ResultChunk::complete(1, json!("done"))).unwrap();

        let outcome = JobResults::new(1, rx)
            .collect(Duration::from_secs(1))
            .unwrap();
        assert_eq!(outcome.partials, vec![json!("a"), json!("b")]);
        assert_eq!(outcome.result, Ok(json!("done")));
    }

    #[test]
    fn test_collect_error() {
        let (tx, rx) = unbounded();
        tx.send(ResultChunk::error(2, "bad rev")).unwrap();

        let outcome = JobResults::new(2, rx)
            .collect(Duration::from_secs(1))
            .unwrap();
        assert!(!outcome.is_ok());
        assert_eq!(outcome.result, Err("bad rev".to_string()));
    }

    #[test]
    fn test_timeout_and_disconnect() {
        let (tx, rx) = unbounded::<ResultChunk>();
        let mut results = JobResults::new(3, rx);

        assert!(matches!(results.try_next(), Ok(None)));
        assert!(matches!(
            results.next_timeout(Duration::from_millis(10)),
            Err(PoolError::Timeout(_))
        ));

        drop(tx);
        assert!(matches!(
            results.next_timeout(Duration::from_millis(10)),
            Err(PoolError::OriginClosed(3))
        ));
    }

    #[test]
    fn test_iterator_stops_at_terminal() {
        let (tx, rx) = unbounded();
        tx.send(ResultChunk::partial(4, json!(1))).unwrap();
        tx.send(ResultChunk::complete(4, json!(2))).unwrap();
        tx.send(ResultChunk::complete(4, json!(3))).unwrap();

        let mut results = JobResults::new(4, rx);
        assert_eq!(results.by_ref().count(), 2);
        assert!(results.is_finished());
    }
}
