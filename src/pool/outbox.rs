//! Deliveries waiting to reach their origins
//!
//! Routing happens under the pool lock; running origins does not. Routed
//! deliveries queue here in routing order and one thread at a time drains
//! them with the lock released. A thread that queues work while another
//! thread is draining waits for its own deliveries to finish, so every pool
//! operation still returns after its chunks were handed over.

use super::router::Delivery;
use crate::types::JobId;
use std::collections::VecDeque;
use std::thread::ThreadId;

/// Position in the delivery sequence
pub(crate) type Mark = u64;

#[derive(Debug, Default)]
pub(crate) struct Outbox {
    pending: VecDeque<(Mark, Delivery)>,
    next: Mark,
    running: Option<Mark>,
    drainer: Option<ThreadId>,
}

impl Outbox {
    /// Queue a delivery behind everything routed before it
    pub(crate) fn push(&mut self, delivery: Delivery) {
        self.pending.push_back((self.next, delivery));
        self.next += 1;
    }

    /// Mark covering everything queued so far
    pub(crate) fn mark(&self) -> Mark {
        self.next
    }

    /// Whether every delivery queued before `mark` has run
    pub(crate) fn reached(&self, mark: Mark) -> bool {
        self.running.map_or(true, |seq| seq >= mark)
            && self.pending.front().map_or(true, |(seq, _)| *seq >= mark)
    }

    /// Thread currently running deliveries
    pub(crate) fn drainer(&self) -> Option<ThreadId> {
        self.drainer
    }

    pub(crate) fn claim(&mut self, thread: ThreadId) {
        self.drainer = Some(thread);
    }

    pub(crate) fn release(&mut self) {
        self.drainer = None;
    }

    /// Take the oldest delivery; it counts as in flight until `finish`
    pub(crate) fn start_next(&mut self) -> Option<Delivery> {
        let (seq, delivery) = self.pending.pop_front()?;
        self.running = Some(seq);
        Some(delivery)
    }

    pub(crate) fn finish(&mut self) {
        self.running = None;
    }

    /// Drop queued deliveries for a job; returns how many carried a chunk
    pub(crate) fn discard(&mut self, id: JobId) -> usize {
        let mut chunks = 0;
        self.pending.retain(|(_, delivery)| {
            let keep = delivery.id() != id;
            if !keep && delivery.chunk().is_some() {
                chunks += 1;
            }
            keep
        });
        chunks
    }

    /// Deliveries not yet started
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::origin::RecordingOrigin;
    use crate::pool::router::ResultRouter;
    use crate::types::ResultChunk;
    use serde_json::json;
    use std::sync::Arc;

    fn routed(router: &mut ResultRouter, chunk: ResultChunk) -> Delivery {
        router.route(chunk).unwrap()
    }

    #[test]
    fn test_mark_reached_in_order() {
        let origin = Arc::new(RecordingOrigin::new());
        let mut router = ResultRouter::new();
        router.bind(1, origin.clone()).unwrap();
        router.bind(2, origin.clone()).unwrap();

        let mut outbox = Outbox::default();
        assert!(outbox.reached(outbox.mark()));

        outbox.push(routed(&mut router, ResultChunk::partial(1, json!(1))));
        let first = outbox.mark();
        outbox.push(routed(&mut router, ResultChunk::complete(2, json!(2))));
        let second = outbox.mark();
        assert!(!outbox.reached(first));

        let delivery = outbox.start_next().unwrap();
        // In flight still counts as outstanding
        assert!(!outbox.reached(first));
        delivery.run();
        outbox.finish();
        assert!(outbox.reached(first));
        assert!(!outbox.reached(second));

        outbox.start_next().unwrap().run();
        outbox.finish();
        assert!(outbox.reached(second));
        assert_eq!(origin.terminal_order(), vec![2]);
    }

    #[test]
    fn test_discard_keeps_other_jobs() {
        let origin = Arc::new(RecordingOrigin::new());
        let mut router = ResultRouter::new();
        router.bind(1, origin.clone()).unwrap();
        router.bind(2, origin.clone()).unwrap();

        let mut outbox = Outbox::default();
        outbox.push(routed(&mut router, ResultChunk::partial(1, json!("a"))));
        outbox.push(routed(&mut router, ResultChunk::partial(2, json!("b"))));
        outbox.push(routed(&mut router, ResultChunk::partial(1, json!("c"))));
        outbox.push(router.unbind(1).unwrap());

        assert_eq!(outbox.discard(1), 2);
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.start_next().unwrap().id(), 2);
    }
}
