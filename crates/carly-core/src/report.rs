//! Assertion capture for `check` bodies.
//!
//! The search explores many interleavings that turn out invalid, so a
//! failing assertion inside `check` is not by itself a real failure.
//! Events are therefore captured into a [`Checker`] and published later:
//! as passes when a worldline is committed, or verbatim from the shrunk
//! input's final re-run when the search is exhausted.

use std::fmt;

/// Severity of a captured assertion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionKind {
    Pass,
    Fail,
    Error,
}

/// A single assertion observation emitted inside a `check` body.
#[derive(Debug, Clone, PartialEq)]
pub struct AssertionEvent {
    pub kind: AssertionKind,
    pub message: String,
    /// Rendered expected value, when the assertion compared two values.
    pub expected: Option<String>,
    /// Rendered actual value, when the assertion compared two values.
    pub actual: Option<String>,
}

impl AssertionEvent {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            kind: AssertionKind::Pass,
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            kind: AssertionKind::Fail,
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    /// The same event downgraded to a pass, for republication along a
    /// committed worldline.
    pub fn as_pass(&self) -> Self {
        Self {
            kind: AssertionKind::Pass,
            ..self.clone()
        }
    }
}

impl fmt::Display for AssertionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AssertionKind::Pass => write!(f, "pass: {}", self.message)?,
            AssertionKind::Fail => write!(f, "FAIL: {}", self.message)?,
            AssertionKind::Error => write!(f, "ERROR: {}", self.message)?,
        }
        if let (Some(expected), Some(actual)) = (&self.expected, &self.actual) {
            write!(f, " (expected {expected}, got {actual})")?;
        }
        Ok(())
    }
}

/// Sink for assertion events during one `check` call.
#[derive(Debug, Default)]
pub struct Checker {
    events: Vec<AssertionEvent>,
}

impl Checker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a boolean expectation.
    pub fn is_true(&mut self, ok: bool, message: impl Into<String>) {
        let message = message.into();
        self.events.push(if ok {
            AssertionEvent::pass(message)
        } else {
            AssertionEvent::fail(message)
        });
    }

    /// Record an equality expectation, rendering both operands.
    pub fn are_eq<T: PartialEq + fmt::Debug>(
        &mut self,
        expected: &T,
        actual: &T,
        message: impl Into<String>,
    ) {
        let kind = if expected == actual {
            AssertionKind::Pass
        } else {
            AssertionKind::Fail
        };
        self.events.push(AssertionEvent {
            kind,
            message: message.into(),
            expected: Some(format!("{expected:?}")),
            actual: Some(format!("{actual:?}")),
        });
    }

    /// Record an unconditional failure.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.events.push(AssertionEvent::fail(message));
    }

    /// Record an error-grade event: the check itself hit an unexpected
    /// condition, as opposed to a value mismatch.
    pub fn error(&mut self, message: impl Into<String>) {
        self.events.push(AssertionEvent {
            kind: AssertionKind::Error,
            message: message.into(),
            expected: None,
            actual: None,
        });
    }

    /// True if any captured event is a `Fail` or `Error`.
    pub fn failed(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e.kind, AssertionKind::Fail | AssertionKind::Error))
    }

    /// Captured events so far.
    pub fn events(&self) -> &[AssertionEvent] {
        &self.events
    }

    /// Drain the captured events.
    pub fn take_events(&mut self) -> Vec<AssertionEvent> {
        std::mem::take(&mut self.events)
    }
}
