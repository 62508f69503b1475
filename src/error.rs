//! Error taxonomy for document analysis runs.
//!
//! Fatal errors (`Config`, `Ingestion`) abort a run before or during setup.
//! Oracle errors are recoverable: the offending section/window is skipped
//! and the failure is counted in diagnostics.

use thiserror::Error;

/// Run-level error. Any of these moves the orchestrator to `Failed`.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Invalid configuration or question registry.
    #[error("configuration error: {0}")]
    Config(String),

    /// The text source violated the page invariants or produced no pages.
    #[error("ingestion error: {0}")]
    Ingestion(String),

    /// An oracle failure that could not be absorbed by the run.
    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// The caller cancelled the run between windows.
    #[error("run cancelled")]
    Cancelled,

    /// Reading a document or registry from disk failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalysisError {
    /// Name of the error kind, used in progress events.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Config(_) => "config",
            AnalysisError::Ingestion(_) => "ingestion",
            AnalysisError::Oracle(_) => "oracle",
            AnalysisError::Cancelled => "cancelled",
            AnalysisError::Io(_) => "io",
        }
    }
}

/// Failure of a single oracle call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OracleError {
    /// Transport or service failure.
    #[error("oracle call failed: {0}")]
    Failed(String),

    /// The call did not complete within the configured timeout.
    #[error("oracle call timed out after {0}s")]
    Timeout(u64),

    /// The oracle replied, but nothing in the reply could be parsed.
    #[error("malformed oracle response: {0}")]
    MalformedResponse(String),
}

impl OracleError {
    /// Whether a retry policy may re-issue the call.
    pub fn is_transient(&self) -> bool {
        matches!(self, OracleError::Failed(_) | OracleError::Timeout(_))
    }
}

/// Why a candidate answer was dropped at the core boundary.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("answer carries no page citation inside its window")]
    MissingCitation,

    #[error("confidence missing, not finite, or outside [0, 1]")]
    ConfidenceOutOfRange,

    #[error("answer has no question id or names a question that was not asked")]
    UnknownQuestion,

    #[error("answer text is empty")]
    EmptyText,
}
