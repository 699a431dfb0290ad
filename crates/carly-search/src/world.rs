//! Immutable search nodes over executed operation histories.
//!
//! A [`World`] is one point in the linearization search: the model after a
//! consumed prefix of the observed history, the prefix itself, and each
//! thread's remaining operations. Worlds are values; stepping produces a
//! new world and never touches the old one, so workers can share them
//! freely.

use carly_core::{AnnotatedOp, AssertionEvent, Checker, Op, ThreadId, ThreadRuns};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Number of distinct linearizations still reachable from a world.
///
/// Computed as the multinomial coefficient over the per-thread pending
/// counts, in saturating `u128`. The value is only compared for ordering
/// and tested against one, both of which survive saturation: one is far
/// below the cap, and saturated worlds simply sort last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Futures(u128);

impl Futures {
    pub const ONE: Futures = Futures(1);

    /// `multinomial(sum(counts); counts...)`, the number of interleavings
    /// of the remaining per-thread sequences.
    pub fn multinomial(counts: &[usize]) -> Futures {
        let mut remaining: usize = counts.iter().sum();
        let mut total: u128 = 1;
        for &count in counts {
            total = total.saturating_mul(binomial(remaining, count));
            remaining -= count;
        }
        Futures(total)
    }

    /// True when at most one interleaving remains.
    #[inline]
    pub fn is_single(self) -> bool {
        self.0 <= 1
    }

    #[inline]
    pub fn get(self) -> u128 {
        self.0
    }
}

impl fmt::Display for Futures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// C(n, k) in saturating `u128`. Exact while below the cap: the running
/// product after step i is C(n - k + i, i), an integer.
fn binomial(n: usize, k: usize) -> u128 {
    let k = k.min(n - k);
    let mut acc: u128 = 1;
    for i in 1..=k {
        acc = acc.saturating_mul((n - k + i) as u128) / i as u128;
    }
    acc
}

/// One thread's executed run plus a cursor over the not-yet-linearized
/// suffix. The run itself is shared between every world of one search.
#[derive(Debug, Clone)]
struct Lane<O: Op> {
    run: Arc<Vec<AnnotatedOp<O>>>,
    cursor: usize,
}

impl<O: Op> Lane<O> {
    /// Wrap a thread's run; empty runs yield no lane at all, preserving
    /// the invariant that `pending` never holds an empty entry.
    fn new(run: Vec<AnnotatedOp<O>>) -> Option<Self> {
        if run.is_empty() {
            None
        } else {
            Some(Self {
                run: Arc::new(run),
                cursor: 0,
            })
        }
    }

    /// The next operation to linearize from this thread.
    #[inline]
    fn head(&self) -> &AnnotatedOp<O> {
        &self.run[self.cursor]
    }

    /// Operations left on this lane. Always at least one.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.run.len() - self.cursor
    }

    /// The lane with its head consumed, or `None` once exhausted.
    fn advanced(&self) -> Option<Self> {
        if self.cursor + 1 < self.run.len() {
            Some(Self {
                run: Arc::clone(&self.run),
                cursor: self.cursor + 1,
            })
        } else {
            None
        }
    }
}

/// Dedup key for equivalent worlds: identical model and identical
/// remaining per-thread operations imply identical successor subtrees.
/// Cursors stand in for the remaining lists because every world of one
/// search shares the same underlying runs, so the keys are exact — no
/// fingerprint collisions to second-guess.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VisitKey<M> {
    model: M,
    cursors: SmallVec<[(ThreadId, usize); 8]>,
}

/// An immutable node in the linearization search.
#[derive(Debug, Clone)]
pub struct World<O: Op> {
    model: O::Model,
    /// Consumed (thread, index-into-that-thread's-run) pairs, in
    /// consumption order.
    history: Vec<(ThreadId, usize)>,
    pending: BTreeMap<ThreadId, Lane<O>>,
    futures: Futures,
    /// Assertion events captured along this world's path.
    reports: Vec<AssertionEvent>,
}

impl<O: Op> World<O> {
    /// Root world over a fresh model and the runner's per-thread results.
    /// Threads with empty runs are dropped up front.
    pub fn initialize(model: O::Model, runs: ThreadRuns<O>) -> World<O> {
        let pending: BTreeMap<ThreadId, Lane<O>> = runs
            .into_iter()
            .filter_map(|(thread, run)| Lane::new(run).map(|lane| (thread, lane)))
            .collect();
        let futures = futures_of(&pending);
        World {
            model,
            history: Vec::new(),
            pending,
            futures,
            reports: Vec::new(),
        }
    }

    /// True when every thread's run has been consumed.
    #[inline]
    pub fn is_end_of_line(&self) -> bool {
        self.pending.is_empty()
    }

    #[inline]
    pub fn model(&self) -> &O::Model {
        &self.model
    }

    #[inline]
    pub fn futures(&self) -> Futures {
        self.futures
    }

    /// The consumed prefix, in consumption order.
    pub fn history(&self) -> &[(ThreadId, usize)] {
        &self.history
    }

    /// Assertion events captured along this world's path.
    pub fn reports(&self) -> &[AssertionEvent] {
        &self.reports
    }

    /// Ids of threads that still have pending operations.
    pub fn runnable(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.pending.keys().copied()
    }

    /// Total operations still pending across all threads.
    pub fn pending_ops(&self) -> usize {
        self.pending.values().map(Lane::remaining).sum()
    }

    /// Attempt to linearize the head operation of `thread` next.
    ///
    /// Returns the successor world when the model accepts the observed
    /// result, `None` when the head fails its check — which prunes this
    /// path only, never the search. Captured assertion events are appended
    /// to `captured` either way and carried on the successor.
    pub fn step(&self, thread: ThreadId, captured: &mut Vec<AssertionEvent>) -> Option<World<O>> {
        let lane = self.pending.get(&thread)?;
        let head = lane.head();

        let mut checker = Checker::new();
        let accepted = head.op.check(&self.model, &head.observed, &mut checker);
        let events = checker.take_events();
        captured.extend(events.iter().cloned());
        if !accepted {
            return None;
        }

        let mut pending = self.pending.clone();
        match lane.advanced() {
            Some(next) => {
                pending.insert(thread, next);
            }
            None => {
                pending.remove(&thread);
            }
        }
        let mut history = self.history.clone();
        history.push((thread, lane.cursor));
        let mut reports = self.reports.clone();
        reports.extend(events);
        let futures = futures_of(&pending);
        Some(World {
            model: head.op.next_model(&self.model),
            history,
            pending,
            futures,
            reports,
        })
    }

    /// Successors for every runnable thread, invalid heads filtered out.
    /// Ordering among threads is not significant.
    pub fn next_steps(&self, captured: &mut Vec<AssertionEvent>) -> Vec<World<O>> {
        self.pending
            .keys()
            .copied()
            .collect::<SmallVec<[ThreadId; 8]>>()
            .into_iter()
            .filter_map(|thread| self.step(thread, captured))
            .collect()
    }

    /// The dedup key for this world.
    pub fn visit_key(&self) -> VisitKey<O::Model> {
        VisitKey {
            model: self.model.clone(),
            cursors: self
                .pending
                .iter()
                .map(|(thread, lane)| (*thread, lane.cursor))
                .collect(),
        }
    }

    /// Iterative fast path for a world with at most one remaining
    /// interleaving: keep stepping the sole runnable thread. Returns the
    /// terminal world if every head checks out, bumping `visited` once per
    /// step taken.
    pub fn run_linear(
        mut self,
        captured: &mut Vec<AssertionEvent>,
        visited: &mut usize,
    ) -> Option<World<O>> {
        debug_assert!(self.futures.is_single());
        loop {
            let thread = match self.pending.keys().next() {
                Some(&thread) => thread,
                None => break,
            };
            *visited += 1;
            self = self.step(thread, captured)?;
        }
        Some(self)
    }
}

fn futures_of<O: Op>(pending: &BTreeMap<ThreadId, Lane<O>>) -> Futures {
    let counts: SmallVec<[usize; 8]> = pending.values().map(Lane::remaining).collect();
    Futures::multinomial(&counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use carly_core::{Observed, TrialOp};

    /// A register with blind writes and checked reads.
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub(crate) enum RegOp {
        Write(u8),
        Read,
    }

    impl Op for RegOp {
        type System = std::sync::Mutex<u8>;
        type Model = u8;
        type Outcome = u8;

        fn apply(&self, system: &Self::System) -> u8 {
            let mut cell = system.lock().unwrap();
            match self {
                RegOp::Write(v) => {
                    *cell = *v;
                    *v
                }
                RegOp::Read => *cell,
            }
        }

        fn check(&self, model: &u8, observed: &Observed<u8>, checker: &mut Checker) -> bool {
            match self {
                RegOp::Read => {
                    checker.are_eq(model, observed.returned().unwrap_or(&u8::MAX), "read value");
                    true
                }
                RegOp::Write(_) => true,
            }
        }

        fn next_model(&self, model: &u8) -> u8 {
            match self {
                RegOp::Write(v) => *v,
                RegOp::Read => *model,
            }
        }
    }

    pub(crate) fn executed(thread: ThreadId, op: RegOp, observed: u8) -> AnnotatedOp<RegOp> {
        AnnotatedOp::new(TrialOp::Op(op), thread, Observed::Returned(observed))
    }

    fn runs(per_thread: Vec<Vec<AnnotatedOp<RegOp>>>) -> ThreadRuns<RegOp> {
        per_thread.into_iter().enumerate().collect()
    }

    #[test]
    fn test_futures_multinomial() {
        assert_eq!(Futures::multinomial(&[]), Futures::ONE);
        assert_eq!(Futures::multinomial(&[4]), Futures::ONE);
        assert_eq!(Futures::multinomial(&[1, 1]).get(), 2);
        assert_eq!(Futures::multinomial(&[3, 3]).get(), 20);
        assert_eq!(Futures::multinomial(&[2, 2, 2]).get(), 90);
    }

    #[test]
    fn test_futures_single_iff_one_thread() {
        assert!(Futures::multinomial(&[5]).is_single());
        assert!(Futures::multinomial(&[]).is_single());
        assert!(!Futures::multinomial(&[1, 2]).is_single());
    }

    #[test]
    fn test_futures_saturates_without_losing_order() {
        let big = Futures::multinomial(&[100, 100, 100]);
        let small = Futures::multinomial(&[2, 2]);
        assert!(small < big);
        assert!(!big.is_single());
    }

    #[test]
    fn test_initialize_drops_empty_threads() {
        let world = World::initialize(0u8, runs(vec![vec![], vec![executed(1, RegOp::Read, 0)]]));
        assert_eq!(world.runnable().collect::<Vec<_>>(), vec![1]);
        assert_eq!(world.futures(), Futures::ONE);
    }

    #[test]
    fn test_step_advances_model_history_and_futures() {
        let world = World::initialize(
            0u8,
            runs(vec![
                vec![executed(0, RegOp::Write(4), 4)],
                vec![executed(1, RegOp::Read, 4)],
            ]),
        );
        assert_eq!(world.futures().get(), 2);

        let mut captured = Vec::new();
        let after_write = world.step(0, &mut captured).expect("write always steps");
        assert_eq!(*after_write.model(), 4);
        assert_eq!(after_write.history(), &[(0, 0)]);
        assert_eq!(after_write.futures(), Futures::ONE);

        let terminal = after_write.step(1, &mut captured).expect("read matches");
        assert!(terminal.is_end_of_line());
        assert_eq!(terminal.history(), &[(0, 0), (1, 0)]);
    }

    #[test]
    fn test_step_rejects_mismatched_read_and_captures_events() {
        let world = World::initialize(0u8, runs(vec![vec![executed(0, RegOp::Read, 9)]]));
        let mut captured = Vec::new();
        assert!(world.step(0, &mut captured).is_none());
        assert_eq!(captured.len(), 1);
        // The origin world is untouched; the path was pruned, not the search.
        assert_eq!(world.pending_ops(), 1);
    }

    #[test]
    fn test_step_is_deterministic() {
        let world = World::initialize(
            0u8,
            runs(vec![
                vec![executed(0, RegOp::Write(1), 1)],
                vec![executed(1, RegOp::Write(2), 2)],
            ]),
        );
        let mut c1 = Vec::new();
        let mut c2 = Vec::new();
        let a = world.step(0, &mut c1).unwrap();
        let b = world.step(0, &mut c2).unwrap();
        assert_eq!(a.model(), b.model());
        assert_eq!(a.history(), b.history());
        assert_eq!(a.futures(), b.futures());
        assert_eq!(a.visit_key(), b.visit_key());
    }

    #[test]
    fn test_visit_key_is_model_plus_cursors() {
        let world = World::initialize(
            0u8,
            runs(vec![
                vec![executed(0, RegOp::Write(7), 7)],
                vec![executed(1, RegOp::Read, 0)],
            ]),
        );
        let mut captured = Vec::new();
        // Read first (model still 0), then write.
        let a = world
            .step(1, &mut captured)
            .and_then(|w| w.step(0, &mut captured))
            .unwrap();
        assert_eq!(a.visit_key(), a.visit_key());
        assert_ne!(world.visit_key(), a.visit_key());
    }

    #[test]
    fn test_run_linear_consumes_single_thread() {
        let world = World::initialize(
            0u8,
            runs(vec![vec![
                executed(0, RegOp::Write(2), 2),
                executed(0, RegOp::Read, 2),
                executed(0, RegOp::Write(5), 5),
            ]]),
        );
        let mut captured = Vec::new();
        let mut visited = 0;
        let terminal = world.run_linear(&mut captured, &mut visited).unwrap();
        assert_eq!(visited, 3);
        assert_eq!(*terminal.model(), 5);
        assert_eq!(terminal.history(), &[(0, 0), (0, 1), (0, 2)]);
    }

    #[test]
    fn test_run_linear_rejects_bad_history() {
        let world = World::initialize(
            0u8,
            runs(vec![vec![
                executed(0, RegOp::Write(2), 2),
                executed(0, RegOp::Read, 3),
            ]]),
        );
        let mut captured = Vec::new();
        let mut visited = 0;
        assert!(world.run_linear(&mut captured, &mut visited).is_none());
        assert_eq!(visited, 2);
        assert!(!captured.is_empty());
    }

    #[test]
    fn test_futures_monotonically_non_increasing() {
        let world = World::initialize(
            0u8,
            runs(vec![
                vec![executed(0, RegOp::Write(1), 1), executed(0, RegOp::Write(2), 2)],
                vec![executed(1, RegOp::Write(3), 3)],
            ]),
        );
        let mut captured = Vec::new();
        let mut frontier = vec![world];
        while let Some(world) = frontier.pop() {
            for next in world.next_steps(&mut captured) {
                assert!(next.futures() <= world.futures());
                frontier.push(next);
            }
        }
    }
}
