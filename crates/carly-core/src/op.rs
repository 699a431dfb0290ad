//! Operation definitions: the user seam, the harness-level dispatch enum,
//! and the annotation attached to executed operations.

use crate::report::Checker;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Identifier of an operation thread within a trial. Thread ids are small
/// indexes assigned in plan order, starting at zero.
pub type ThreadId = usize;

/// Per-thread executed operation sequences, in program order.
pub type ThreadRuns<O> = BTreeMap<ThreadId, Vec<AnnotatedOp<O>>>;

/// A single operation against the system under test, with its model
/// predictions.
///
/// Implementors are usually enums whose variants carry the generated
/// arguments; equality and hashing are structural over those arguments plus
/// the variant tag, which is what the search's visited table keys on.
pub trait Op: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// The system under test. One instance is shared by reference across
    /// every operation thread of a repetition; its internal thread safety
    /// is its own contract, and any misbehavior of a system that lacks it
    /// is a legitimate counterexample.
    type System: Send + Sync + 'static;

    /// The immutable reference model. Never mutated by the harness; each
    /// transition produces a new value.
    type Model: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// The value observed when the operation runs.
    type Outcome: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    /// Run the operation against the real system and return what was
    /// observed.
    fn apply(&self, system: &Self::System) -> Self::Outcome;

    /// Validate an observed result against the model state.
    ///
    /// Assertion events written to `checker` are captured rather than
    /// published; the step is accepted iff this returns true and no
    /// captured event is a failure.
    fn check(
        &self,
        model: &Self::Model,
        observed: &Observed<Self::Outcome>,
        checker: &mut Checker,
    ) -> bool {
        let _ = (model, observed, checker);
        true
    }

    /// Pure transition to the next model state.
    fn next_model(&self, model: &Self::Model) -> Self::Model {
        model.clone()
    }
}

/// Result annotation attached to an executed operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed<T> {
    /// The operation produced no meaningful value (built-in waits).
    Unit,
    /// The operation returned normally.
    Returned(T),
    /// The operation panicked. The payload is the rendered panic message;
    /// it is a first-class result and flows into `check` like any other
    /// observed value.
    Panicked(String),
}

impl<T> Observed<T> {
    /// The returned value, if the operation completed normally.
    #[inline]
    pub fn returned(&self) -> Option<&T> {
        match self {
            Observed::Returned(value) => Some(value),
            _ => None,
        }
    }

    /// True if the operation ended in a panic.
    #[inline]
    pub fn panicked(&self) -> bool {
        matches!(self, Observed::Panicked(_))
    }
}

/// A planned operation within a trial: the built-in interleaving wait or a
/// user operation. This is the tagged-variant dispatch layer; `Op` is the
/// capability seam underneath it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrialOp<O> {
    /// Sleep the executing thread for the given number of milliseconds.
    /// A no-op on the model; generated only when concurrency > 1 to widen
    /// the space of observable interleavings.
    Wait(u64),
    /// A user operation carrying its generated arguments.
    Op(O),
}

impl<O: Op> TrialOp<O> {
    /// Apply against the system. A panic inside the user operation is
    /// caught here and becomes the observed value.
    pub fn apply(&self, system: &O::System) -> Observed<O::Outcome> {
        match self {
            TrialOp::Wait(ms) => {
                thread::sleep(Duration::from_millis(*ms));
                Observed::Unit
            }
            TrialOp::Op(op) => {
                match panic::catch_unwind(AssertUnwindSafe(|| op.apply(system))) {
                    Ok(value) => Observed::Returned(value),
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        debug!(op = ?op, panic = %message, "operation panicked");
                        Observed::Panicked(message)
                    }
                }
            }
        }
    }

    /// Validate an observed result against the model. Waits always pass;
    /// user checks are vetoed by any captured failure event.
    pub fn check(
        &self,
        model: &O::Model,
        observed: &Observed<O::Outcome>,
        checker: &mut Checker,
    ) -> bool {
        match self {
            TrialOp::Wait(_) => true,
            TrialOp::Op(op) => op.check(model, observed, checker) && !checker.failed(),
        }
    }

    /// The model after this operation.
    pub fn next_model(&self, model: &O::Model) -> O::Model {
        match self {
            TrialOp::Wait(_) => model.clone(),
            TrialOp::Op(op) => op.next_model(model),
        }
    }

    /// True for the built-in wait.
    #[inline]
    pub fn is_wait(&self) -> bool {
        matches!(self, TrialOp::Wait(_))
    }
}

/// Render a panic payload into a message.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic of unknown type".to_string()
    }
}

/// An operation that has executed: the plan, the thread that ran it, and
/// what was observed. Annotations are structural values; the search only
/// ever consumes annotated operations, so a pending op can never lack its
/// result.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedOp<O: Op> {
    pub op: TrialOp<O>,
    pub thread: ThreadId,
    pub observed: Observed<O::Outcome>,
}

impl<O: Op> AnnotatedOp<O> {
    /// Annotate an executed plan entry.
    pub fn new(op: TrialOp<O>, thread: ThreadId, observed: Observed<O::Outcome>) -> Self {
        Self {
            op,
            thread,
            observed,
        }
    }
}
