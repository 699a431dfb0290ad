//! Barrier-synchronized execution of per-thread operation plans.

use carly_core::{AnnotatedOp, Op, ThreadId, ThreadRuns, TrialOp};
use std::collections::BTreeMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Fatal failure while executing a trial's operation threads.
#[derive(Debug, Error)]
pub enum RunError {
    /// Workers failed to deliver results before the configured deadline.
    /// The stalled threads are abandoned, not cancelled.
    #[error("only {received} of {threads} operation threads finished within {deadline_ms} ms")]
    Stalled {
        received: usize,
        threads: usize,
        deadline_ms: u64,
    },
}

/// Timing telemetry for one execution. Emitted to the reporter by the
/// trial driver; not part of the functional result.
#[derive(Debug, Clone, Copy)]
pub struct RunStats {
    pub op_count: usize,
    pub threads: usize,
    pub elapsed: Duration,
}

/// Outcome of running a trial's plans against one fresh system.
#[derive(Debug)]
pub struct RunOutput<O: Op> {
    pub runs: ThreadRuns<O>,
    pub stats: RunStats,
}

/// Execute per-thread plans against a shared system.
///
/// Zero plans return an empty result; one plan runs linearly on the
/// calling thread. With more, one worker is spawned per plan and all
/// workers rendezvous on a barrier before their first operation, so the
/// schedules overlap as tightly as the OS allows. A panic inside an
/// operation becomes that operation's observed result; workers never
/// propagate. The system's internal thread safety is not the runner's
/// concern — observed misbehavior of a racy system is the point.
pub fn run_ops<O: Op>(
    system: &Arc<O::System>,
    plans: Vec<Vec<TrialOp<O>>>,
    deadline: Option<Duration>,
) -> Result<RunOutput<O>, RunError> {
    let start = Instant::now();
    let threads = plans.len();
    let op_count: usize = plans.iter().map(Vec::len).sum();

    let runs = match threads {
        0 => BTreeMap::new(),
        1 => {
            let plan = plans.into_iter().next().unwrap_or_default();
            BTreeMap::from([(0, apply_plan(system.as_ref(), 0, plan))])
        }
        _ => run_threads(system, plans, deadline)?,
    };

    let stats = RunStats {
        op_count,
        threads,
        elapsed: start.elapsed(),
    };
    debug!(
        threads,
        op_count,
        elapsed_ms = stats.elapsed.as_millis() as u64,
        "ops applied"
    );
    Ok(RunOutput { runs, stats })
}

fn apply_plan<O: Op>(
    system: &O::System,
    thread: ThreadId,
    plan: Vec<TrialOp<O>>,
) -> Vec<AnnotatedOp<O>> {
    plan.into_iter()
        .map(|op| {
            let observed = op.apply(system);
            AnnotatedOp::new(op, thread, observed)
        })
        .collect()
}

fn run_threads<O: Op>(
    system: &Arc<O::System>,
    plans: Vec<Vec<TrialOp<O>>>,
    deadline: Option<Duration>,
) -> Result<ThreadRuns<O>, RunError> {
    let threads = plans.len();
    let barrier = Arc::new(Barrier::new(threads));
    let (tx, rx) = mpsc::channel();

    for (thread, plan) in plans.into_iter().enumerate() {
        let system = Arc::clone(system);
        let barrier = Arc::clone(&barrier);
        let tx = tx.clone();
        thread::spawn(move || {
            barrier.wait();
            let run = apply_plan(system.as_ref(), thread, plan);
            // The receiver may have abandoned a stalled run already.
            let _ = tx.send((thread, run));
        });
    }
    drop(tx);

    let give_up_at = deadline.map(|limit| Instant::now() + limit);
    let mut runs = BTreeMap::new();
    for _ in 0..threads {
        let received = match give_up_at {
            Some(at) => {
                let remaining = at.saturating_duration_since(Instant::now());
                match rx.recv_timeout(remaining) {
                    Ok(received) => received,
                    Err(RecvTimeoutError::Timeout) => {
                        let deadline_ms = deadline.unwrap_or_default().as_millis() as u64;
                        warn!(
                            received = runs.len(),
                            threads, deadline_ms, "abandoning stalled operation threads"
                        );
                        return Err(RunError::Stalled {
                            received: runs.len(),
                            threads,
                            deadline_ms,
                        });
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(received) => received,
                Err(_) => break,
            },
        };
        runs.insert(received.0, received.1);
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use carly_core::Observed;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    enum SlotOp {
        Set(u8),
        Peek,
        Stall,
    }

    impl Op for SlotOp {
        type System = std::sync::Mutex<u8>;
        type Model = u8;
        type Outcome = u8;

        fn apply(&self, system: &Self::System) -> u8 {
            match self {
                SlotOp::Set(v) => {
                    *system.lock().unwrap() = *v;
                    *v
                }
                SlotOp::Peek => *system.lock().unwrap(),
                SlotOp::Stall => {
                    thread::sleep(Duration::from_secs(5));
                    0
                }
            }
        }

    }

    #[test]
    fn test_zero_threads_is_empty() {
        let system = Arc::new(std::sync::Mutex::new(0));
        let output = run_ops::<SlotOp>(&system, vec![], None).unwrap();
        assert!(output.runs.is_empty());
        assert_eq!(output.stats.threads, 0);
    }

    #[test]
    fn test_single_thread_runs_in_place() {
        let system = Arc::new(std::sync::Mutex::new(0));
        let plan = vec![TrialOp::Op(SlotOp::Set(3)), TrialOp::Op(SlotOp::Peek)];
        let output = run_ops(&system, vec![plan], None).unwrap();
        let run = &output.runs[&0];
        assert_eq!(run.len(), 2);
        assert_eq!(run[0].observed, Observed::Returned(3));
        assert_eq!(run[1].observed, Observed::Returned(3));
        assert!(run.iter().all(|op| op.thread == 0));
    }

    #[test]
    fn test_parallel_run_annotates_every_thread() {
        let system = Arc::new(std::sync::Mutex::new(0));
        let plans = vec![
            vec![TrialOp::Op(SlotOp::Set(1)), TrialOp::Op(SlotOp::Peek)],
            vec![TrialOp::Wait(1), TrialOp::Op(SlotOp::Set(2))],
            vec![TrialOp::Op(SlotOp::Peek)],
        ];
        let output = run_ops(&system, plans, None).unwrap();
        assert_eq!(output.runs.len(), 3);
        assert_eq!(output.stats.op_count, 5);
        for (thread, run) in &output.runs {
            assert!(run.iter().all(|op| op.thread == *thread));
        }
        assert_eq!(output.runs[&1][0].observed, Observed::Unit);
    }

    #[test]
    fn test_program_order_is_preserved_per_thread() {
        let system = Arc::new(std::sync::Mutex::new(0));
        let plan: Vec<TrialOp<SlotOp>> =
            (0..5).map(|i| TrialOp::Op(SlotOp::Set(i))).collect();
        let output = run_ops(&system, vec![plan.clone(), plan.clone()], None).unwrap();
        for run in output.runs.values() {
            let order: Vec<_> = run.iter().map(|op| op.op.clone()).collect();
            assert_eq!(order, plan);
        }
    }

    #[test]
    fn test_stalled_worker_hits_deadline() {
        let system = Arc::new(std::sync::Mutex::new(0));
        let plans = vec![
            vec![TrialOp::Op(SlotOp::Stall)],
            vec![TrialOp::Op(SlotOp::Peek)],
        ];
        let err = run_ops(&system, plans, Some(Duration::from_millis(100))).unwrap_err();
        match err {
            RunError::Stalled {
                threads,
                deadline_ms,
                ..
            } => {
                assert_eq!(threads, 2);
                assert_eq!(deadline_ms, 100);
            }
        }
    }
}
