//! Randomized trial generation and shrinking on top of proptest.
//!
//! The driver owns the iteration loop instead of handing proptest a
//! closure: it needs to account for shrink depth and candidate counts,
//! keep the reporter quiet during shrink re-runs, and attach the minimal
//! input's full search report to the summary.

use crate::reporter::{Event, NullReporter, Reporter};
use crate::trial::{run_trial, TrialFailure, TrialResult};
use crate::{IterOpts, Options, TrialInput};
use carly_core::Op;
use proptest::strategy::{Strategy, ValueTree};
use proptest::test_runner::{Config, RngAlgorithm, TestRng, TestRunner};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, info, warn};

/// Candidate cap for one shrink session when the caller does not set one.
const DEFAULT_MAX_SHRINK_ITERS: usize = 4096;

/// Final verdict of a `check_system` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed,
}

/// Minimal failing input and shrink accounting.
#[derive(Debug)]
pub struct Shrunk<C, O: Op> {
    /// Simplifications accepted between the original failure and the
    /// minimal one.
    pub depth: usize,
    /// Candidate inputs evaluated while shrinking.
    pub total_nodes_visited: usize,
    pub smallest: TrialInput<C, O>,
    /// The smallest input's failure, from a final re-run. `None` only if
    /// the minimal input stopped failing on the re-run (a flaky schedule).
    pub result: Option<TrialFailure<O>>,
}

/// Summary of a whole `check_system` run.
#[derive(Debug)]
pub struct CheckSummary<C, O: Op> {
    pub result: Verdict,
    /// Seed the generation rng was built from.
    pub seed: u64,
    /// Generated inputs actually run.
    pub num_tests: u32,
    pub shrunk: Option<Shrunk<C, O>>,
}

impl<C, O: Op> CheckSummary<C, O> {
    #[inline]
    pub fn passed(&self) -> bool {
        self.result == Verdict::Passed
    }
}

/// Run `num_tests` generated trials, shrinking the first failure.
pub(crate) fn drive<C, O, F, S>(
    message: &str,
    iter_opts: &IterOpts,
    strategy: S,
    init_system: &F,
    options: &Options<C, O>,
    reporter: &dyn Reporter,
) -> CheckSummary<C, O>
where
    C: Clone + fmt::Debug + Send + Sync + 'static,
    O: Op,
    F: Fn(&C) -> O::System,
    S: Strategy<Value = TrialInput<C, O>>,
{
    let num_tests = iter_opts
        .num_tests
        .unwrap_or(if options.concurrency > 1 { 20 } else { 100 });
    let seed = iter_opts.seed.unwrap_or_else(rand::random);
    let max_shrink_iters = iter_opts
        .max_shrink_iters
        .unwrap_or(DEFAULT_MAX_SHRINK_ITERS);

    let rng = TestRng::from_seed(RngAlgorithm::ChaCha, &expand_seed(seed));
    let mut runner = TestRunner::new_with_rng(
        Config {
            cases: num_tests,
            ..Config::default()
        },
        rng,
    );
    info!(name = message, num_tests, seed, "starting generative run");

    for test in 0..num_tests {
        let mut tree = match strategy.new_tree(&mut runner) {
            Ok(tree) => tree,
            Err(reason) => {
                warn!(reason = reason.message(), "input generation rejected");
                continue;
            }
        };

        let outcome = contained_trial(&tree.current(), init_system, options, reporter);
        if outcome.passed() {
            continue;
        }
        debug!(test, "trial failed; shrinking");

        let (depth, total_nodes_visited) =
            shrink(&mut tree, init_system, options, max_shrink_iters);
        let smallest = tree.current();
        // Final re-run: the one whose assertion events get published.
        let final_outcome = contained_trial(&smallest, init_system, options, &NullReporter);

        reporter.publish(&Event::Summary {
            message: message.to_string(),
            passed: false,
            num_tests: test + 1,
            seed,
        });
        let reports = final_outcome
            .failure
            .as_ref()
            .and_then(TrialFailure::report)
            .map(|report| report.reports.clone())
            .unwrap_or_default();
        reporter.publish(&Event::Shrunk {
            depth,
            total_nodes_visited,
            smallest: format!("{smallest:?}"),
            reports,
        });

        return CheckSummary {
            result: Verdict::Failed,
            seed,
            num_tests: test + 1,
            shrunk: Some(Shrunk {
                depth,
                total_nodes_visited,
                smallest,
                result: final_outcome.failure,
            }),
        };
    }

    reporter.publish(&Event::Summary {
        message: message.to_string(),
        passed: true,
        num_tests,
        seed,
    });
    CheckSummary {
        result: Verdict::Passed,
        seed,
        num_tests,
        shrunk: None,
    }
}

/// Run one trial, converting a panic anywhere in the trial (factory,
/// hooks, generation glue) into a fatal failure instead of crashing the
/// whole run.
fn contained_trial<C, O, F>(
    input: &TrialInput<C, O>,
    init_system: &F,
    options: &Options<C, O>,
    reporter: &dyn Reporter,
) -> TrialResult<O>
where
    C: Clone + fmt::Debug + Send + Sync + 'static,
    O: Op,
    F: Fn(&C) -> O::System,
{
    match panic::catch_unwind(AssertUnwindSafe(|| {
        run_trial(input, init_system, options, reporter)
    })) {
        Ok(result) => result,
        Err(payload) => {
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "trial panicked".to_string()
            };
            warn!(panic = %message, "trial raised");
            TrialResult {
                repetitions: 0,
                failure: Some(TrialFailure::Fatal {
                    repetition: 0,
                    message,
                }),
            }
        }
    }
}

/// The classic simplify/complicate walk: move toward simpler inputs while
/// they keep failing, step back when one passes. Returns accepted depth
/// and candidates evaluated.
fn shrink<C, O, F, T>(
    tree: &mut T,
    init_system: &F,
    options: &Options<C, O>,
    max_iters: usize,
) -> (usize, usize)
where
    C: Clone + fmt::Debug + Send + Sync + 'static,
    O: Op,
    F: Fn(&C) -> O::System,
    T: ValueTree<Value = TrialInput<C, O>>,
{
    let mut depth = 0usize;
    let mut nodes = 0usize;
    let mut moved = tree.simplify();
    while moved && nodes < max_iters {
        nodes += 1;
        let failed = !contained_trial(&tree.current(), init_system, options, &NullReporter)
            .passed();
        moved = if failed {
            depth += 1;
            tree.simplify()
        } else {
            tree.complicate()
        };
    }
    if nodes >= max_iters {
        warn!(max_iters, "shrink candidate budget exhausted");
    }
    debug!(depth, nodes, "shrinking finished");
    (depth, nodes)
}

/// Widen a 64-bit seed into the 32-byte ChaCha seed.
fn expand_seed(seed: u64) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    for (i, chunk) in bytes.chunks_exact_mut(8).enumerate() {
        chunk.copy_from_slice(&(seed.rotate_left(i as u32 * 8)).to_le_bytes());
    }
    bytes
}
