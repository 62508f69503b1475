//! Run diagnostics: counters for everything the pipeline absorbs silently.

use crate::error::{OracleError, Rejection};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Shared counters, incremented from concurrent oracle calls.
#[derive(Debug, Default)]
pub struct Diagnostics {
    oracle_calls_failed: AtomicU64,
    oracle_timeouts: AtomicU64,
    malformed_responses: AtomicU64,
    dropped_answers: AtomicU64,
    redelivered_answers: AtomicU64,
    budget_trims: AtomicU64,
    persona_failures: AtomicU64,
}

/// Point-in-time copy of [`Diagnostics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub oracle_calls_failed: u64,
    pub oracle_timeouts: u64,
    pub malformed_responses: u64,
    pub dropped_answers: u64,
    pub redelivered_answers: u64,
    pub budget_trims: u64,
    pub persona_failures: u64,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a failed section call by kind.
    pub fn record_oracle_error(&self, error: &OracleError) {
        let counter = match error {
            OracleError::Failed(_) => &self.oracle_calls_failed,
            OracleError::Timeout(_) => &self.oracle_timeouts,
            OracleError::MalformedResponse(_) => &self.malformed_responses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, reason: Rejection) {
        debug!("Dropped answer: {}", reason);
        self.dropped_answers.fetch_add(1, Ordering::Relaxed);
    }

    /// Count answers the oracle returned that never parsed.
    pub fn record_unparsed(&self, count: usize) {
        self.dropped_answers
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_redelivered(&self) {
        self.redelivered_answers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_budget_trim(&self) {
        self.budget_trims.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persona_failure(&self) {
        self.persona_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_answers(&self) -> u64 {
        self.dropped_answers.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            oracle_calls_failed: self.oracle_calls_failed.load(Ordering::Relaxed),
            oracle_timeouts: self.oracle_timeouts.load(Ordering::Relaxed),
            malformed_responses: self.malformed_responses.load(Ordering::Relaxed),
            dropped_answers: self.dropped_answers.load(Ordering::Relaxed),
            redelivered_answers: self.redelivered_answers.load(Ordering::Relaxed),
            budget_trims: self.budget_trims.load(Ordering::Relaxed),
            persona_failures: self.persona_failures.load(Ordering::Relaxed),
        }
    }
}

impl DiagnosticsSnapshot {
    /// Failed section calls of any kind.
    pub fn failed_calls(&self) -> u64 {
        self.oracle_calls_failed + self.oracle_timeouts + self.malformed_responses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_errors_by_kind() {
        let diagnostics = Diagnostics::new();
        diagnostics.record_oracle_error(&OracleError::Failed("x".to_string()));
        diagnostics.record_oracle_error(&OracleError::Timeout(5));
        diagnostics.record_oracle_error(&OracleError::Timeout(5));
        diagnostics.record_oracle_error(&OracleError::MalformedResponse("y".to_string()));

        let snapshot = diagnostics.snapshot();
        assert_eq!(snapshot.oracle_calls_failed, 1);
        assert_eq!(snapshot.oracle_timeouts, 2);
        assert_eq!(snapshot.malformed_responses, 1);
        assert_eq!(snapshot.failed_calls(), 4);
    }

    #[test]
    fn test_dropped_answers_include_unparsed() {
        let diagnostics = Diagnostics::new();
        diagnostics.record_dropped(Rejection::MissingCitation);
        diagnostics.record_unparsed(2);
        assert_eq!(diagnostics.dropped_answers(), 3);
    }
}
