//! Linear and parallel worldline search.
//!
//! Given a model and the executed per-thread histories, find some
//! linearization — a total order consistent with every thread's program
//! order — under which the model predicts exactly the observed results.
//! Worlds closest to a terminal decision (fewest remaining futures) are
//! expanded first; a failed check prunes one path and nothing else, so the
//! search concludes "no world" only after the whole reachable space has
//! been visited.

use crate::frontier::Frontier;
use crate::visited::Visited;
use crate::world::{Futures, VisitKey, World};
use carly_core::{AssertionEvent, Op, ThreadRuns};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

/// How long a worker waits on the frontier before re-checking for
/// termination. Bounds shutdown latency; not semantically significant.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Fatal search-entry error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchError {
    /// The runner produced no thread results at all.
    #[error("cannot search the worldless void")]
    WorldlessVoid,
}

/// Outcome of a worldline search.
#[derive(Debug)]
pub struct SearchReport<O: Op> {
    /// A valid terminal world, or `None` when the reachable space held no
    /// linearization matching the observed results.
    pub world: Option<World<O>>,
    /// Worker threads used.
    pub threads: usize,
    /// Futures of the origin world: the number of distinct linearizations
    /// the observed history admitted a priori.
    pub futures: Futures,
    /// Worlds visited before the search concluded.
    pub visited: usize,
    /// Assertion events: the winning path's on success, everything
    /// captured during the search otherwise.
    pub reports: Vec<AssertionEvent>,
    pub elapsed: Duration,
}

impl<O: Op> SearchReport<O> {
    /// True when a valid linearization was found.
    #[inline]
    pub fn found(&self) -> bool {
        self.world.is_some()
    }
}

/// Search for a linearization of `runs` that the model accepts.
///
/// With at most one thread holding pending operations the interleaving is
/// forced and a linear scan decides the outcome on the calling thread;
/// otherwise `search_threads` workers run a best-first exploration ordered
/// by ascending futures.
pub fn search<O: Op>(
    search_threads: usize,
    model: O::Model,
    runs: ThreadRuns<O>,
) -> Result<SearchReport<O>, SearchError> {
    if runs.is_empty() {
        return Err(SearchError::WorldlessVoid);
    }
    let start = Instant::now();
    let origin = World::initialize(model, runs);
    let futures = origin.futures();
    let runnable = origin.runnable().count();

    if runnable <= 1 {
        return Ok(linear_search(origin, futures, start));
    }
    Ok(parallel_search(search_threads.max(1), origin, futures, start))
}

fn linear_search<O: Op>(origin: World<O>, futures: Futures, start: Instant) -> SearchReport<O> {
    let mut captured = Vec::new();
    let mut visited = 0usize;
    let world = origin.run_linear(&mut captured, &mut visited);
    debug!(visited, found = world.is_some(), "linear search complete");
    let reports = match &world {
        Some(world) => world.reports().to_vec(),
        None => captured,
    };
    SearchReport {
        world,
        threads: 1,
        futures,
        visited,
        reports,
        elapsed: start.elapsed(),
    }
}

/// State shared by the parallel workers.
struct Shared<O: Op> {
    frontier: Frontier<O>,
    visited: Visited<VisitKey<O::Model>>,
    /// First-wins cell: `Some(world)` for a committed worldline, `None`
    /// for exhaustion.
    result: OnceLock<Option<World<O>>>,
    /// Events captured along paths that did not win; returned when the
    /// search is exhausted.
    captured: Mutex<Vec<AssertionEvent>>,
    /// Steps taken inside linear fast paths, on top of the visited table.
    linear_visits: AtomicUsize,
}

fn parallel_search<O: Op>(
    threads: usize,
    origin: World<O>,
    futures: Futures,
    start: Instant,
) -> SearchReport<O> {
    let shared: Shared<O> = Shared {
        frontier: Frontier::new(),
        visited: Visited::new(),
        result: OnceLock::new(),
        captured: Mutex::new(Vec::new()),
        linear_visits: AtomicUsize::new(0),
    };
    debug!(threads, futures = %futures, "starting parallel search");
    shared.frontier.push(origin);

    thread::scope(|scope| {
        for worker in 0..threads {
            let shared = &shared;
            scope.spawn(move || worker_loop(worker, shared));
        }
    });

    let visited = shared.visited.len() + shared.linear_visits.load(Ordering::Relaxed);
    let world = shared.result.into_inner().flatten();
    let reports = match &world {
        Some(world) => world.reports().to_vec(),
        None => shared
            .captured
            .into_inner()
            .unwrap_or_else(|e| e.into_inner()),
    };
    debug!(
        visited,
        found = world.is_some(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "parallel search complete"
    );
    SearchReport {
        world,
        threads,
        futures,
        visited,
        reports,
        elapsed: start.elapsed(),
    }
}

/// Calls [`Frontier::done`] when dropped, unwinding included.
struct DoneGuard<'a, O: Op>(&'a Frontier<O>);

impl<O: Op> Drop for DoneGuard<'_, O> {
    fn drop(&mut self) {
        self.0.done();
    }
}

fn worker_loop<O: Op>(worker: usize, shared: &Shared<O>) {
    let mut captured = Vec::new();
    loop {
        if shared.result.get().is_some() {
            break;
        }
        let Some(world) = shared.frontier.poll(POLL_TIMEOUT) else {
            if shared.frontier.drained() {
                if shared.result.set(None).is_ok() {
                    debug!(worker, "search space exhausted");
                }
                shared.frontier.wake_all();
                break;
            }
            continue;
        };
        if shared.result.get().is_some() {
            shared.frontier.done();
            break;
        }

        // Balances the poll even if a user `check` panics mid-expansion,
        // so the remaining workers can still drain and terminate.
        let guard = DoneGuard(&shared.frontier);

        if !shared.visited.insert(world.visit_key()) {
            trace!(worker, "world already visited");
            drop(guard);
            continue;
        }

        let mut terminal = None;
        if world.futures().is_single() {
            let mut visits = 0usize;
            terminal = world.run_linear(&mut captured, &mut visits);
            shared.linear_visits.fetch_add(visits, Ordering::Relaxed);
        } else {
            for next in world.next_steps(&mut captured) {
                if !shared.visited.contains(&next.visit_key()) {
                    shared.frontier.push(next);
                }
            }
        }
        drop(guard);

        if !captured.is_empty() {
            let mut sink = shared.captured.lock().unwrap_or_else(|e| e.into_inner());
            sink.append(&mut captured);
        }

        if let Some(world) = terminal {
            if shared.result.set(Some(world)).is_ok() {
                trace!(worker, "worldline committed");
            }
            shared.frontier.wake_all();
            break;
        }
    }
}
