//! Core data model for the test-carly harness: the operation seam, the
//! dispatch enum with the built-in wait, executed-operation annotations,
//! and assertion capture.

pub mod op;
pub mod report;

pub use op::{AnnotatedOp, Observed, Op, ThreadId, ThreadRuns, TrialOp};
pub use report::{AssertionEvent, AssertionKind, Checker};
