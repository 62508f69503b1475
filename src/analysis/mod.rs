//! Analysis pipeline.
//!
//! Windows flow through the dispatcher into the accumulator, first for
//! every question and then, in a second pass, for whatever is still
//! unanswered. The orchestrator sequences it all and reports progress.

pub mod accumulator;
pub mod budget;
pub mod diagnostics;
pub mod dispatcher;
pub mod events;
pub mod orchestrator;
pub mod personas;
pub mod second_pass;
pub mod similarity;

pub use accumulator::{select_primary, AcceptOutcome, Accumulator, QuestionState};
pub use budget::{BudgetConfig, BudgetGovernor};
pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use events::{ProgressEvent, ProgressSink};
pub use orchestrator::{Orchestrator, RunOutcome, RunSettings, RunState};
pub use second_pass::{Pass, PassSettings, Thresholds};
