//! Routes result chunks to the origin bound to their job
//!
//! A binding lives from submission until the job's terminal chunk has been
//! routed, or until the caller closes it early. Chunks for unbound ids are
//! dropped: the caller may have navigated away while a result was in flight.
//!
//! Routing only decides where a chunk goes. It returns a [`Delivery`] that
//! the pool runs after releasing its lock, so origins are free to call back
//! into the pool.

use crate::error::{PoolError, Result};
use crate::pool::origin::Origin;
use crate::types::{JobId, ResultChunk};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What happened to a routed chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Forwarded; the binding is still open
    Delivered,
    /// Forwarded as the terminal chunk; the binding is gone
    Terminated,
    /// No binding for the id; the chunk was discarded
    Dropped,
}

/// A chunk and/or close notice on its way to an origin
pub struct Delivery {
    id: JobId,
    origin: Arc<dyn Origin>,
    chunk: Option<ResultChunk>,
    close: bool,
}

impl Delivery {
    /// Job the delivery belongs to
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Chunk to send, if any
    pub fn chunk(&self) -> Option<&ResultChunk> {
        self.chunk.as_ref()
    }

    /// Whether the origin is told the binding ended
    pub fn closes(&self) -> bool {
        self.close
    }

    /// How routing classified this delivery
    pub fn outcome(&self) -> RouteOutcome {
        if self.close && self.chunk.is_some() {
            RouteOutcome::Terminated
        } else {
            RouteOutcome::Delivered
        }
    }

    /// Hand the chunk to the origin, then close the binding if it ended
    pub fn run(self) {
        if let Some(chunk) = self.chunk {
            self.origin.send(chunk);
        }
        if self.close {
            self.origin.close(self.id);
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.id)
            .field("chunk", &self.chunk)
            .field("close", &self.close)
            .finish()
    }
}

/// Job id → origin bindings
#[derive(Default)]
pub struct ResultRouter {
    bindings: HashMap<JobId, Arc<dyn Origin>>,
}

impl fmt::Debug for ResultRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.bindings.keys().collect();
        ids.sort();
        f.debug_struct("ResultRouter").field("bound", &ids).finish()
    }
}

impl ResultRouter {
    /// Create a router with no bindings
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an origin to a job id
    pub fn bind(&mut self, id: JobId, origin: Arc<dyn Origin>) -> Result<()> {
        if self.bindings.contains_key(&id) {
            return Err(PoolError::DuplicateBinding(id));
        }
        self.bindings.insert(id, origin);
        Ok(())
    }

    /// Address a chunk to its job's origin
    ///
    /// A terminal chunk tears the binding down here, so each job yields
    /// exactly one terminal delivery. Returns `None` for unbound ids.
    pub fn route(&mut self, chunk: ResultChunk) -> Option<Delivery> {
        let id = chunk.id();

        let origin = if chunk.is_terminal() {
            self.bindings.remove(&id)
        } else {
            self.bindings.get(&id).cloned()
        };
        let Some(origin) = origin else {
            tracing::trace!("Dropping chunk for unbound job {}", id);
            return None;
        };

        Some(Delivery {
            id,
            origin,
            close: chunk.is_terminal(),
            chunk: Some(chunk),
        })
    }

    /// Detach a job's origin; later chunks for the id are dropped
    ///
    /// The returned delivery carries the close notice. `None` if nothing was
    /// bound.
    pub fn unbind(&mut self, id: JobId) -> Option<Delivery> {
        self.bindings.remove(&id).map(|origin| Delivery {
            id,
            origin,
            chunk: None,
            close: true,
        })
    }

    /// Drop a binding without notifying its origin
    pub fn forget(&mut self, id: JobId) -> bool {
        self.bindings.remove(&id).is_some()
    }

    /// Address a terminal error to every bound job, in id order
    pub fn fail_all(&mut self, message: &str) -> Vec<Delivery> {
        let mut ids: Vec<JobId> = self.bindings.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.route(ResultChunk::error(id, message)))
            .collect()
    }

    /// Whether an origin is bound to the id
    pub fn is_bound(&self, id: JobId) -> bool {
        self.bindings.contains_key(&id)
    }

    /// Number of open bindings
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no binding is open
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
