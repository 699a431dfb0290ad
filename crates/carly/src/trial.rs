//! One trial: repeated run-then-search cycles over a generated input.
//!
//! A trial re-runs its input against a fresh system several times because
//! concurrency bugs only manifest on some schedules; one repetition with
//! no valid worldline condemns the whole trial.

use crate::reporter::{Event, Reporter};
use crate::runner::run_ops;
use crate::{Options, TrialInput};
use carly_core::Op;
use carly_search::{search, SearchReport};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Why a trial failed.
#[derive(Debug)]
pub enum TrialFailure<O: Op> {
    /// A repetition's search exhausted the interleaving space without a
    /// valid worldline: the model cannot explain the observed results.
    NoWorldline {
        repetition: usize,
        report: SearchReport<O>,
    },
    /// Infrastructure gave out: stalled workers, a panicking hook, or an
    /// empty run where one was required.
    Fatal { repetition: usize, message: String },
}

impl<O: Op> TrialFailure<O> {
    /// The search report attached to the failure, when there is one.
    pub fn report(&self) -> Option<&SearchReport<O>> {
        match self {
            TrialFailure::NoWorldline { report, .. } => Some(report),
            TrialFailure::Fatal { .. } => None,
        }
    }
}

impl<O: Op> fmt::Display for TrialFailure<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrialFailure::NoWorldline { repetition, report } => write!(
                f,
                "no valid worldline at repetition {repetition} ({} futures, {} visited)",
                report.futures, report.visited
            ),
            TrialFailure::Fatal {
                repetition,
                message,
            } => write!(f, "fatal at repetition {repetition}: {message}"),
        }
    }
}

/// Outcome of one trial.
#[derive(Debug)]
pub struct TrialResult<O: Op> {
    /// Repetitions actually executed.
    pub repetitions: usize,
    pub failure: Option<TrialFailure<O>>,
}

impl<O: Op> TrialResult<O> {
    #[inline]
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Run every repetition of one generated input.
pub(crate) fn run_trial<C, O, F>(
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
    let op_count: usize = input.op_seqs.iter().map(Vec::len).sum();
    reporter.publish(&Event::TrialStart {
        op_count,
        concurrency: input.op_seqs.len(),
        repetitions: options.repetitions,
    });

    for repetition in 0..options.repetitions {
        let system = Arc::new(init_system(&input.context));
        reporter.publish(&Event::TestStart);

        let output = match run_ops::<O>(&system, input.op_seqs.clone(), options.run_deadline) {
            Ok(output) => output,
            Err(error) => {
                finalize(options, &system);
                reporter.publish(&Event::TrialFail { repetition });
                return TrialResult {
                    repetitions: repetition + 1,
                    failure: Some(TrialFailure::Fatal {
                        repetition,
                        message: error.to_string(),
                    }),
                };
            }
        };
        reporter.publish(&Event::RunOps {
            op_count: output.stats.op_count,
            threads: output.stats.threads,
            elapsed: output.stats.elapsed,
        });
        finalize(options, &system);

        let model = (options.init_model)(&input.context);
        let report = match search(options.search_threads, model, output.runs) {
            Ok(report) => report,
            Err(error) => {
                reporter.publish(&Event::TrialFail { repetition });
                return TrialResult {
                    repetitions: repetition + 1,
                    failure: Some(TrialFailure::Fatal {
                        repetition,
                        message: error.to_string(),
                    }),
                };
            }
        };

        if report.found() {
            reporter.publish(&Event::TestPass {
                futures: report.futures,
                visited: report.visited,
                elapsed: report.elapsed,
                reports: report.reports.clone(),
            });
        } else {
            debug!(repetition, visited = report.visited, "no worldline");
            reporter.publish(&Event::TestFail {
                futures: report.futures,
                visited: report.visited,
                elapsed: report.elapsed,
                reports: report.reports.clone(),
            });
            reporter.publish(&Event::TrialFail { repetition });
            return TrialResult {
                repetitions: repetition + 1,
                failure: Some(TrialFailure::NoWorldline { repetition, report }),
            };
        }
    }

    reporter.publish(&Event::TrialPass);
    TrialResult {
        repetitions: options.repetitions,
        failure: None,
    }
}

fn finalize<C, O: Op>(options: &Options<C, O>, system: &Arc<O::System>) {
    if let Some(hook) = &options.finalize {
        hook(system.as_ref());
    }
}
