//! Progress events emitted by a run.
//!
//! Events travel over an unbounded channel in the order they happen. The
//! channel closes when the orchestrator (and every sink clone) is dropped,
//! which is the completion signal for consumers.

use crate::analysis::second_pass::Pass;
use crate::analysis::orchestrator::RunState;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

/// One step of progress in a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    StateChanged {
        from: RunState,
        to: RunState,
    },
    Ingested {
        page_count: usize,
    },
    PersonaReady {
        section_id: String,
    },
    WindowStarted {
        pass: Pass,
        index: usize,
        page_numbers: Vec<u32>,
    },
    WindowFinished {
        pass: Pass,
        index: usize,
        answers_found: usize,
    },
    BudgetTrimmed {
        window_index: usize,
        section_id: String,
        pages_dropped: usize,
        chars_dropped: usize,
    },
    SecondPassStarted {
        question_count: usize,
    },
    Done {
        questions_answered: usize,
        total_questions: usize,
    },
    Error {
        stage: String,
        message: String,
    },
}

/// Sending half of the progress channel. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    sender: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    /// A sink plus the receiver its events arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A sink that discards every event.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Emit an event. A consumer that went away is not an error.
    pub fn emit(&self, event: ProgressEvent) {
        trace!(?event, "progress");
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}
