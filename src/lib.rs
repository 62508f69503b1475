//! DocAudit library.
//!
//! Answers a static battery of questions from a long document by slicing
//! it into page windows, asking an oracle about each window per section,
//! and merging the answers into one cited result per question.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod models;
pub mod oracle;
pub mod questions;
pub mod report;

#[cfg(test)]
mod test_support;

pub use analysis::{Orchestrator, ProgressEvent, ProgressSink, RunOutcome, RunSettings, RunState};
pub use error::{AnalysisError, OracleError, Rejection};
