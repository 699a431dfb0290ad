//! Shared best-first frontier for the parallel search.

use crate::world::{Futures, World};
use carly_core::Op;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Heap entry ordered so the `BinaryHeap` max-heap pops the world with the
/// fewest futures first; ties resolve by insertion sequence (FIFO).
struct Entry<O: Op> {
    futures: Futures,
    seq: u64,
    world: World<O>,
}

impl<O: Op> PartialEq for Entry<O> {
    fn eq(&self, other: &Self) -> bool {
        self.futures == other.futures && self.seq == other.seq
    }
}

impl<O: Op> Eq for Entry<O> {}

impl<O: Op> PartialOrd for Entry<O> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<O: Op> Ord for Entry<O> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .futures
            .cmp(&self.futures)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Heap<O: Op> {
    entries: BinaryHeap<Entry<O>>,
    next_seq: u64,
}

/// Priority queue of worlds ordered by ascending futures, with a timed
/// poll and an in-flight count.
///
/// The in-flight count lets workers distinguish "drained" from
/// "momentarily empty": a popped world may still fan successors back in,
/// so exhaustion is only declared when the heap is empty *and* nobody
/// holds a popped world. The count moves to one under the heap lock (in
/// `poll`), which makes the `drained` check race-free.
pub struct Frontier<O: Op> {
    heap: Mutex<Heap<O>>,
    available: Condvar,
    in_flight: AtomicUsize,
}

impl<O: Op> Frontier<O> {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(Heap {
                entries: BinaryHeap::new(),
                next_seq: 0,
            }),
            available: Condvar::new(),
            in_flight: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Heap<O>> {
        // A worker panicking mid-push is already a harness bug; keep the
        // remaining workers able to drain and terminate.
        self.heap.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a world for expansion.
    pub fn push(&self, world: World<O>) {
        let mut heap = self.lock();
        let seq = heap.next_seq;
        heap.next_seq += 1;
        heap.entries.push(Entry {
            futures: world.futures(),
            seq,
            world,
        });
        drop(heap);
        self.available.notify_one();
    }

    /// Pop the best world, waiting up to `timeout` for one to appear.
    /// `None` means the frontier stayed empty for the whole window. A
    /// successful poll must be balanced by [`Frontier::done`].
    pub fn poll(&self, timeout: Duration) -> Option<World<O>> {
        let heap = self.lock();
        let (mut heap, _) = self
            .available
            .wait_timeout_while(heap, timeout, |h| h.entries.is_empty())
            .unwrap_or_else(|e| e.into_inner());
        let entry = heap.entries.pop()?;
        // Counted before the lock drops so `drained` cannot observe an
        // empty heap with this world unaccounted for.
        self.in_flight.fetch_add(1, AtomicOrdering::SeqCst);
        Some(entry.world)
    }

    /// Mark a previously polled world fully processed (its successors, if
    /// any, are already pushed).
    pub fn done(&self) {
        self.in_flight.fetch_sub(1, AtomicOrdering::SeqCst);
    }

    /// True when nothing is queued and no worker holds a popped world.
    pub fn drained(&self) -> bool {
        let heap = self.lock();
        heap.entries.is_empty() && self.in_flight.load(AtomicOrdering::SeqCst) == 0
    }

    /// Worlds currently queued.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wake every poller, e.g. once a result has been decided.
    pub fn wake_all(&self) {
        self.available.notify_all();
    }
}

impl<O: Op> Default for Frontier<O> {
    fn default() -> Self {
        Self::new()
    }
}
