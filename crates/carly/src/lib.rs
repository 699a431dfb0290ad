//! Generative linearizability checking for stateful systems.
//!
//! Supply a factory for a fresh system under test, an immutable model of
//! its expected behavior, and generators for its operations.
//! [`check_system`] generates randomized per-thread operation sequences,
//! runs them against one shared system instance behind a start barrier,
//! and then searches for a *worldline* — a sequential ordering respecting
//! each thread's program order — under which the model predicts exactly
//! the observed results. A history with no such ordering is a
//! counterexample, which is shrunk to a minimal failing input.
//!
//! With `concurrency = 1` the same entry point degenerates to ordinary
//! model-based sequential testing: the run passes iff the model predicts
//! every observed result in order.

pub mod drive;
mod macros;
pub mod reporter;
pub mod runner;
pub mod trial;

pub use carly_core::{
    AnnotatedOp, AssertionEvent, AssertionKind, Checker, Observed, Op, ThreadId, ThreadRuns,
    TrialOp,
};
pub use carly_search::{search, Futures, SearchError, SearchReport, VisitKey, World};
pub use drive::{CheckSummary, Shrunk, Verdict};
pub use reporter::{
    ConsoleReporter, Event, NullReporter, PrettyOptions, ReportConfig, Reporter, Style,
};
pub use runner::{run_ops, RunError, RunOutput, RunStats};
pub use trial::{TrialFailure, TrialResult};

// Re-exported so downstream op generators and `define_ops!` expansions use
// the same proptest the harness drives.
pub use proptest;

use proptest::strategy::{BoxedStrategy, Just, Strategy, Union};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Iteration controls for the generative driver.
#[derive(Debug, Clone, Default)]
pub struct IterOpts {
    /// Generated inputs per run. Default: 20 when concurrency > 1,
    /// 100 otherwise.
    pub num_tests: Option<u32>,
    /// Seed for the generation rng; random when absent. The seed used is
    /// always echoed in the summary for replay.
    pub seed: Option<u64>,
    /// Cap on candidate inputs evaluated while shrinking.
    pub max_shrink_iters: Option<usize>,
}

/// One generated trial input: the context shared by every operation of the
/// trial, and the per-thread operation plans.
#[derive(Debug, Clone)]
pub struct TrialInput<C, O> {
    pub context: C,
    pub op_seqs: Vec<Vec<TrialOp<O>>>,
}

impl<C, O: Op> TrialInput<C, O> {
    /// User operations across all threads, waits excluded.
    pub fn user_ops(&self) -> usize {
        self.op_seqs
            .iter()
            .flatten()
            .filter(|op| !op.is_wait())
            .count()
    }
}

/// Generator for one operation type, given the trial context.
pub type OpGen<C, O> = Arc<dyn Fn(&C) -> BoxedStrategy<O> + Send + Sync>;

/// Options for [`check_system`].
pub struct Options<C, O: Op> {
    /// Generator for the trial context (e.g. the key set ops draw from).
    pub context_gen: BoxedStrategy<C>,
    /// Fresh model from the context; called once per repetition.
    pub init_model: Arc<dyn Fn(&C) -> O::Model + Send + Sync>,
    /// Teardown hook, invoked on every exit path of a repetition.
    pub finalize: Option<Arc<dyn Fn(&O::System) + Send + Sync>>,
    /// Parallel operation threads per trial.
    pub concurrency: usize,
    /// Run-then-search cycles per generated input; guards against bugs
    /// that only manifest on some schedules.
    pub repetitions: usize,
    /// Search worker pool size.
    pub search_threads: usize,
    /// Longest generated operation sequence per thread.
    pub max_ops: usize,
    /// Overall deadline for collecting one execution's workers.
    pub run_deadline: Option<Duration>,
    /// Console reporter configuration.
    pub report: ReportConfig,
    /// Full reporter replacement; wins over `report` when set.
    pub reporter: Option<Arc<dyn Reporter>>,
}

impl<C, O> Options<C, O>
where
    C: Clone + fmt::Debug + Send + Sync + 'static,
    O: Op,
{
    /// Options with the documented defaults: concurrency 4, repetitions 5,
    /// search pool sized to the host, and a context generator producing
    /// the type's default value.
    pub fn new(init_model: impl Fn(&C) -> O::Model + Send + Sync + 'static) -> Self
    where
        C: Default,
    {
        Self {
            context_gen: Just(C::default()).boxed(),
            init_model: Arc::new(init_model),
            finalize: None,
            concurrency: 4,
            repetitions: 5,
            search_threads: default_search_threads(),
            max_ops: 6,
            run_deadline: None,
            report: ReportConfig::default(),
            reporter: None,
        }
    }

    /// Options whose model starts from its type's default value, the
    /// common case for map- and counter-shaped models.
    pub fn with_default_model() -> Self
    where
        C: Default,
        O::Model: Default,
    {
        Self::new(|_| O::Model::default())
    }

    pub fn with_context_gen(
        mut self,
        context_gen: impl Strategy<Value = C> + Send + Sync + 'static,
    ) -> Self {
        self.context_gen = context_gen.boxed();
        self
    }

    /// Sequential mode: one operation thread, no wait injection.
    pub fn linear(mut self) -> Self {
        self.concurrency = 1;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_repetitions(mut self, repetitions: usize) -> Self {
        self.repetitions = repetitions;
        self
    }

    pub fn with_search_threads(mut self, search_threads: usize) -> Self {
        self.search_threads = search_threads;
        self
    }

    pub fn with_max_ops(mut self, max_ops: usize) -> Self {
        self.max_ops = max_ops;
        self
    }

    pub fn with_finalize(mut self, finalize: impl Fn(&O::System) + Send + Sync + 'static) -> Self {
        self.finalize = Some(Arc::new(finalize));
        self
    }

    pub fn with_run_deadline(mut self, deadline: Duration) -> Self {
        self.run_deadline = Some(deadline);
        self
    }

    pub fn with_report(mut self, report: ReportConfig) -> Self {
        self.report = report;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }
}

fn default_search_threads() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Check a stateful system against its model.
///
/// `init_system` builds a fresh system from the trial context — exactly
/// one signature, `Fn(&C) -> S` — and is called once per repetition.
/// `op_gens` supply the operations; the built-in wait is prepended to the
/// list automatically when `options.concurrency > 1`. Returns a summary
/// with the verdict, the replay seed, and the shrunk counterexample on
/// failure.
pub fn check_system<C, O, S, F>(
    message: &str,
    iter_opts: IterOpts,
    init_system: F,
    op_gens: Vec<OpGen<C, O>>,
    options: Options<C, O>,
) -> CheckSummary<C, O>
where
    C: Clone + fmt::Debug + Send + Sync + 'static,
    O: Op<System = S>,
    S: Send + Sync + 'static,
    F: Fn(&C) -> S,
{
    assert!(
        !op_gens.is_empty(),
        "check_system requires at least one operation generator"
    );
    debug!(
        name = message,
        concurrency = options.concurrency,
        repetitions = options.repetitions,
        "check_system"
    );
    let strategy = trial_input_strategy(&options, op_gens);
    let console;
    let reporter: &dyn Reporter = match &options.reporter {
        Some(custom) => custom.as_ref(),
        None => {
            console = ConsoleReporter::new(&options.report);
            &console
        }
    };
    drive::drive(message, &iter_opts, strategy, &init_system, &options, reporter)
}

/// Strategy for whole trial inputs: draw a context, then `concurrency`
/// operation sequences from the per-op union built against that context.
fn trial_input_strategy<C, O>(
    options: &Options<C, O>,
    op_gens: Vec<OpGen<C, O>>,
) -> impl Strategy<Value = TrialInput<C, O>>
where
    C: Clone + fmt::Debug + Send + Sync + 'static,
    O: Op,
{
    let concurrency = options.concurrency;
    let max_ops = options.max_ops;
    let op_gens = Arc::new(op_gens);
    options
        .context_gen
        .clone()
        .prop_flat_map(move |context| {
            let per_op = op_union(&context, &op_gens, concurrency);
            let seqs = proptest::collection::vec(
                proptest::collection::vec(per_op, 0..=max_ops),
                concurrency,
            );
            (Just(context), seqs)
        })
        .prop_map(|(context, op_seqs)| TrialInput { context, op_seqs })
}

/// One-of over the user generators, with the wait generator prepended iff
/// the trial is concurrent.
fn op_union<C, O: Op>(
    context: &C,
    op_gens: &[OpGen<C, O>],
    concurrency: usize,
) -> BoxedStrategy<TrialOp<O>> {
    let mut arms: Vec<BoxedStrategy<TrialOp<O>>> = Vec::with_capacity(op_gens.len() + 1);
    if concurrency > 1 {
        arms.push((1u64..=100).prop_map(TrialOp::Wait).boxed());
    }
    for op_gen in op_gens {
        arms.push(op_gen(context).prop_map(TrialOp::Op).boxed());
    }
    Union::new(arms).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Ping;

    impl Op for Ping {
        type System = ();
        type Model = u8;
        type Outcome = u8;
        fn apply(&self, _system: &()) -> u8 {
            0
        }
    }

    fn ping_gens() -> Vec<OpGen<u8, Ping>> {
        vec![Arc::new(|_context: &u8| Just(Ping).boxed())]
    }

    fn sample_inputs(options: &Options<u8, Ping>, count: usize) -> Vec<TrialInput<u8, Ping>> {
        let strategy = trial_input_strategy(options, ping_gens());
        let mut runner = TestRunner::deterministic();
        (0..count)
            .map(|_| strategy.new_tree(&mut runner).unwrap().current())
            .collect()
    }

    #[test]
    fn test_linear_inputs_have_one_thread_and_no_waits() {
        let options = Options::<u8, Ping>::new(|_| 0).linear();
        for input in sample_inputs(&options, 16) {
            assert_eq!(input.op_seqs.len(), 1);
            assert!(input.op_seqs[0].iter().all(|op| !op.is_wait()));
        }
    }

    #[test]
    fn test_concurrent_inputs_match_concurrency_and_inject_waits() {
        let options = Options::<u8, Ping>::new(|_| 0).with_concurrency(3);
        let inputs = sample_inputs(&options, 32);
        assert!(inputs.iter().all(|input| input.op_seqs.len() == 3));
        // Waits are part of the union, so a decent sample contains some.
        let waits: usize = inputs
            .iter()
            .flat_map(|input| input.op_seqs.iter().flatten())
            .filter(|op| op.is_wait())
            .count();
        assert!(waits > 0, "expected wait injection in concurrent mode");
    }

    #[test]
    fn test_max_ops_bounds_sequences() {
        let options = Options::<u8, Ping>::new(|_| 0).with_max_ops(2);
        for input in sample_inputs(&options, 16) {
            assert!(input.op_seqs.iter().all(|seq| seq.len() <= 2));
        }
    }

    #[test]
    fn test_wait_durations_are_in_range() {
        let options = Options::<u8, Ping>::new(|_| 0).with_concurrency(2);
        for input in sample_inputs(&options, 32) {
            for op in input.op_seqs.iter().flatten() {
                if let TrialOp::Wait(ms) = op {
                    assert!((1..=100).contains(ms));
                }
            }
        }
    }
}
