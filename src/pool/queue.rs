//! Priority queue of pending jobs
//!
//! Jobs are ordered by priority (higher first) and then by insertion order,
//! so equal priorities are served FIFO. A reprioritized job keeps its
//! original insertion slot among its new peers.
//!
//! The queue also remembers the job currently executing, so an id stays
//! reserved from the moment it is submitted until its terminal chunk.

use crate::error::{PoolError, Result};
use crate::types::{Job, JobId};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

/// Ordering key: highest priority first, then oldest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    rank: Reverse<i64>,
    seq: u64,
}

impl QueueKey {
    fn new(priority: i64, seq: u64) -> Self {
        Self {
            rank: Reverse(priority),
            seq,
        }
    }
}

/// Pending jobs keyed by id, ordered by priority
#[derive(Debug, Default)]
pub struct JobQueue {
    ordered: BTreeMap<QueueKey, Job>,
    index: HashMap<JobId, QueueKey>,
    active: Option<JobId>,
    next_seq: u64,
}

impl JobQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job; fails if its id is pending or executing
    pub fn insert(&mut self, job: Job) -> Result<()> {
        if self.is_live(job.id) {
            return Err(PoolError::DuplicateId(job.id));
        }

        let key = QueueKey::new(job.priority, self.next_seq);
        self.next_seq += 1;
        self.index.insert(job.id, key);
        self.ordered.insert(key, job);
        Ok(())
    }

    /// Change a pending job's priority
    ///
    /// Returns false, without error, when the job is not pending: it may
    /// already be executing or finished.
    pub fn reprioritize(&mut self, id: JobId, priority: i64) -> bool {
        let Some(old_key) = self.index.get(&id).copied() else {
            return false;
        };
        let Some(mut job) = self.ordered.remove(&old_key) else {
            return false;
        };

        let key = QueueKey::new(priority, old_key.seq);
        job.priority = priority;
        self.index.insert(id, key);
        self.ordered.insert(key, job);
        true
    }

    /// Remove a pending job
    pub fn remove(&mut self, id: JobId) -> Result<Job> {
        let key = self.index.remove(&id).ok_or(PoolError::NotPending(id))?;
        self.ordered.remove(&key).ok_or(PoolError::NotPending(id))
    }

    /// Remove and return the highest-priority job, marking it as executing
    pub fn pop_highest(&mut self) -> Option<Job> {
        self.pop_highest_above(None)
    }

    /// Like [`pop_highest`](Self::pop_highest), but leaves jobs with
    /// priority at or below `floor` parked
    pub fn pop_highest_above(&mut self, floor: Option<i64>) -> Option<Job> {
        let (key, job) = self.ordered.first_key_value()?;
        if floor.is_some_and(|floor| job.priority <= floor) {
            return None;
        }

        let key = *key;
        let job = self.ordered.remove(&key)?;
        self.index.remove(&job.id);
        self.active = Some(job.id);
        Some(job)
    }

    /// Release the executing job's id; returns false if it was not executing
    pub fn complete(&mut self, id: JobId) -> bool {
        if self.active == Some(id) {
            self.active = None;
            true
        } else {
            false
        }
    }

    /// Id of the executing job
    pub fn active(&self) -> Option<JobId> {
        self.active
    }

    /// Whether the job is waiting to be dispatched
    pub fn is_pending(&self, id: JobId) -> bool {
        self.index.contains_key(&id)
    }

    /// Whether the id is pending or executing
    pub fn is_live(&self, id: JobId) -> bool {
        self.active == Some(id) || self.is_pending(id)
    }

    /// Highest-priority pending job
    pub fn peek_highest(&self) -> Option<&Job> {
        self.ordered.values().next()
    }

    /// Pending jobs in dispatch order
    pub fn pending(&self) -> impl Iterator<Item = &Job> {
        self.ordered.values()
    }

    /// Remove every pending job, in dispatch order
    pub fn drain(&mut self) -> Vec<Job> {
        self.index.clear();
        std::mem::take(&mut self.ordered).into_values().collect()
    }

    /// Number of pending jobs
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}
