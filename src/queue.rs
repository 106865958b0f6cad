//! Priority queue of thumbnail requests.
//!
//! # Invariants
//!
//! - **One pending request per target.** Enqueueing a request for a target
//!   that is already pending merges into the existing entry: the priority
//!   becomes the higher of the two and `force` is OR-ed. The merged entry
//!   keeps its original queue position within its (possibly raised) priority.
//! - **Priority first, then FIFO.** `High` is served before `Medium` before
//!   `Low`; equal priorities are served in insertion order.
//! - **One worker per target.** A target handed out by [`ThumbnailQueue::claim`]
//!   is in flight until the returned [`ClaimedRequest`] is dropped. A new
//!   request for it may be queued meanwhile, but is not handed to another
//!   worker until the first one finishes.
//!
//! Workers block on a condition variable instead of polling, bounded by a
//! timeout so they can notice shutdown even without new work.

use crate::request::{Priority, ThumbnailRequest};
use crate::sync::{lock, wait_timeout};
use crate::targets::TargetId;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::trace;

type OrderKey = (Reverse<Priority>, u64);

struct Pending {
    request: ThumbnailRequest,
    seq: u64,
}

impl Pending {
    fn key(&self) -> OrderKey {
        (Reverse(self.request.priority), self.seq)
    }
}

#[derive(Default)]
struct QueueState {
    order: BTreeMap<OrderKey, TargetId>,
    pending: HashMap<TargetId, Pending>,
    in_flight: HashSet<TargetId>,
    next_seq: u64,
    closed: bool,
}

impl QueueState {
    /// Pop the most urgent request whose target is not in flight.
    fn pop_ready(&mut self) -> Option<ThumbnailRequest> {
        let (key, id) = self
            .order
            .iter()
            .find(|(_, id)| !self.in_flight.contains(*id))
            .map(|(k, id)| (*k, *id))?;
        self.order.remove(&key);
        self.pending.remove(&id).map(|p| p.request)
    }
}

struct Shared {
    state: Mutex<QueueState>,
    available: Condvar,
}

/// Thread-safe, deduplicating priority queue. Clones share the same queue.
#[derive(Clone)]
pub struct ThumbnailQueue {
    shared: Arc<Shared>,
}

impl Default for ThumbnailQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ThumbnailQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("ThumbnailQueue")
            .field("pending", &state.pending.len())
            .field("in_flight", &state.in_flight.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// Outcome of [`ThumbnailQueue::claim`].
#[derive(Debug)]
pub enum Claim {
    Request(ClaimedRequest),
    /// Nothing became available before the timeout.
    Idle,
    /// The queue was closed; the worker should exit.
    Closed,
}

impl ThumbnailQueue {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                available: Condvar::new(),
            }),
        }
    }

    /// Add `request`, merging it into a pending request for the same target.
    ///
    /// Returns `true` if a new entry was created.
    pub fn enqueue(&self, request: ThumbnailRequest) -> bool {
        let id = request.target_id();
        let mut guard = lock(&self.shared.state);
        let state = &mut *guard;

        if let Some(existing) = state.pending.get_mut(&id) {
            let old_key = existing.key();
            let priority = existing.request.priority.max(request.priority);
            let force = existing.request.force || request.force;
            existing.request.priority = priority;
            existing.request.force = force;
            let new_key = existing.key();
            if new_key != old_key {
                state.order.remove(&old_key);
                state.order.insert(new_key, id);
            }
            trace!(target_id = %id, %priority, force, "merged thumbnail request");
            return false;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let pending = Pending { request, seq };
        state.order.insert(pending.key(), id);
        trace!(target_id = %id, priority = %pending.request.priority, "queued thumbnail request");
        state.pending.insert(id, pending);
        drop(guard);
        self.shared.available.notify_all();
        true
    }

    /// Pop the most urgent request, if any, without marking it in flight.
    pub fn dequeue_highest_priority(&self) -> Option<ThumbnailRequest> {
        lock(&self.shared.state).pop_ready()
    }

    /// Wait up to `timeout` for a request and mark its target in flight.
    pub fn claim(&self, timeout: Duration) -> Claim {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.shared.state);
        loop {
            if state.closed {
                return Claim::Closed;
            }
            if let Some(request) = state.pop_ready() {
                state.in_flight.insert(request.target_id());
                return Claim::Request(ClaimedRequest {
                    request,
                    queue: self.clone(),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Claim::Idle;
            }
            state = wait_timeout(&self.shared.available, state, deadline - now).0;
        }
    }

    fn release(&self, id: TargetId) {
        let mut state = lock(&self.shared.state);
        state.in_flight.remove(&id);
        let waiting = state.pending.contains_key(&id);
        drop(state);
        if waiting {
            self.shared.available.notify_all();
        }
    }

    /// Cancel the pending request for `target`. Unknown targets are a no-op.
    pub fn remove(&self, target: TargetId) -> bool {
        let mut state = lock(&self.shared.state);
        match state.pending.remove(&target) {
            Some(pending) => {
                state.order.remove(&pending.key());
                true
            }
            None => false,
        }
    }

    /// Drop every pending request.
    pub fn clear(&self) {
        let mut state = lock(&self.shared.state);
        state.pending.clear();
        state.order.clear();
    }

    /// Number of pending (not in flight) requests.
    pub fn len(&self) -> usize {
        lock(&self.shared.state).pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, target: TargetId) -> bool {
        lock(&self.shared.state).pending.contains_key(&target)
    }

    pub fn priority_of(&self, target: TargetId) -> Option<Priority> {
        lock(&self.shared.state)
            .pending
            .get(&target)
            .map(|p| p.request.priority)
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.shared.state).in_flight.len()
    }

    /// Stop handing out work and wake every waiting worker.
    pub fn close(&self) {
        lock(&self.shared.state).closed = true;
        self.shared.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.state).closed
    }
}

/// A request being processed. Its target stays in flight until this is dropped.
pub struct ClaimedRequest {
    request: ThumbnailRequest,
    queue: ThumbnailQueue,
}

impl ClaimedRequest {
    pub fn request(&self) -> &ThumbnailRequest {
        &self.request
    }
}

impl Deref for ClaimedRequest {
    type Target = ThumbnailRequest;

    fn deref(&self) -> &ThumbnailRequest {
        &self.request
    }
}

impl std::fmt::Debug for ClaimedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ClaimedRequest").field(&self.request).finish()
    }
}

impl Drop for ClaimedRequest {
    fn drop(&mut self) {
        self.queue.release(self.request.target_id());
    }
}
