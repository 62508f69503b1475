//! End-to-end run sequencing.
//!
//! An [`Orchestrator`] drives exactly one run through
//! `Idle → Ingesting → ConfiguringQuestions → GeneratingPersonas →
//! ProcessingWindows → SecondPass → Compiling → Done`, or to `Failed` from
//! any of them. All run state lives in the orchestrator and the context it
//! builds; nothing is shared between runs. Dropping the orchestrator (which
//! `run` does) closes the progress channel.

use crate::analysis::accumulator::{Accumulator, QuestionState};
use crate::analysis::budget::{BudgetConfig, BudgetGovernor};
use crate::analysis::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::analysis::dispatcher::{Dispatcher, DEFAULT_CONCURRENCY};
use crate::analysis::events::{ProgressEvent, ProgressSink};
use crate::analysis::personas::PersonaCache;
use crate::analysis::second_pass::{
    outstanding_questions, question_scope, PassSettings, Thresholds,
};
use crate::document::{make_windows, validate_pages, TextSource};
use crate::error::AnalysisError;
use crate::models::BudgetReport;
use crate::oracle::Oracle;
use crate::questions::{QuestionRegistry, RegistryConfig};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Lifecycle of a run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Ingesting,
    ConfiguringQuestions,
    GeneratingPersonas,
    ProcessingWindows,
    SecondPass,
    Compiling,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Ingesting => "ingesting",
            RunState::ConfiguringQuestions => "configuring_questions",
            RunState::GeneratingPersonas => "generating_personas",
            RunState::ProcessingWindows => "processing_windows",
            RunState::SecondPass => "second_pass",
            RunState::Compiling => "compiling",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    /// Pages per window.
    pub window_size: usize,
    /// Concurrent section calls per window.
    pub concurrency: usize,
    pub budget: BudgetConfig,
    pub thresholds: Thresholds,
    pub guardrails: Vec<String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            window_size: 10,
            concurrency: DEFAULT_CONCURRENCY,
            budget: BudgetConfig::default(),
            thresholds: Thresholds::default(),
            guardrails: Vec::new(),
        }
    }
}

impl RunSettings {
    fn validate(&self) -> Result<(), AnalysisError> {
        if self.window_size == 0 {
            return Err(AnalysisError::Config(
                "window size must be greater than 0".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(AnalysisError::Config(
                "concurrency must be greater than 0".to_string(),
            ));
        }
        if self.budget.prompt_token_ceiling == 0 || self.budget.chars_per_token == 0 {
            return Err(AnalysisError::Config(
                "prompt token ceiling and chars per token must be greater than 0".to_string(),
            ));
        }
        let bad = self.thresholds.out_of_range();
        if !bad.is_empty() {
            return Err(AnalysisError::Config(format!(
                "thresholds must be within [0, 1]: {}",
                bad.join(", ")
            )));
        }
        Ok(())
    }
}

/// Everything a finished run hands to output compilation.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub registry: QuestionRegistry,
    pub answers: QuestionState,
    pub budget: BudgetReport,
    pub diagnostics: DiagnosticsSnapshot,
    pub page_count: usize,
    pub window_count: usize,
    /// Questions carried into the second pass.
    pub second_pass_questions: usize,
    pub duration: Duration,
}

/// Drives a single run. Construct one per run.
pub struct Orchestrator {
    oracle: Arc<dyn Oracle>,
    settings: RunSettings,
    events: ProgressSink,
    cancel: CancellationToken,
    state: RunState,
}

impl Orchestrator {
    pub fn new(oracle: Arc<dyn Oracle>, settings: RunSettings) -> Self {
        Self {
            oracle,
            settings,
            events: ProgressSink::disabled(),
            cancel: CancellationToken::new(),
            state: RunState::Idle,
        }
    }

    /// Sends progress events to `events`.
    pub fn with_events(mut self, events: ProgressSink) -> Self {
        self.events = events;
        self
    }

    /// Uses an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this run between windows.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Runs the whole pipeline. Recoverable oracle failures are absorbed
    /// and counted; configuration, ingestion and cancellation end the run
    /// in `Failed` and are returned.
    pub async fn run(
        mut self,
        source: &dyn TextSource,
        questions: RegistryConfig,
    ) -> Result<RunOutcome, AnalysisError> {
        let started = Instant::now();
        info!(source = %source.describe(), "Starting analysis run");

        match self.execute(source, questions, started).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let stage = self.state;
                self.transition(RunState::Failed);
                warn!(stage = %stage, "Run failed: {}", e);
                self.events.emit(ProgressEvent::Error {
                    stage: stage.to_string(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn execute(
        &mut self,
        source: &dyn TextSource,
        questions: RegistryConfig,
        started: Instant,
    ) -> Result<RunOutcome, AnalysisError> {
        self.transition(RunState::Ingesting);
        let pages = source.get_pages()?;
        validate_pages(&pages)?;
        info!(pages = pages.len(), "Document ingested");
        self.events.emit(ProgressEvent::Ingested {
            page_count: pages.len(),
        });

        self.transition(RunState::ConfiguringQuestions);
        self.settings.validate()?;
        let registry = QuestionRegistry::new(questions)?;
        let windows = make_windows(&pages, self.settings.window_size)?;
        info!(
            sections = registry.sections().len(),
            questions = registry.question_count(),
            windows = windows.len(),
            "Questions configured"
        );

        let oracle = Arc::clone(&self.oracle);
        let events = self.events.clone();
        let guardrails = self.settings.guardrails.clone();
        let diagnostics = Arc::new(Diagnostics::new());
        let accumulator = Accumulator::new(
            registry.questions().map(|q| q.id.clone()),
            Arc::clone(&diagnostics),
        );
        let personas = PersonaCache::new(registry.sections());
        let budget = BudgetGovernor::new(self.settings.budget.clone());

        let dispatcher = Dispatcher {
            oracle: oracle.as_ref(),
            registry: &registry,
            personas: &personas,
            budget: &budget,
            accumulator: &accumulator,
            diagnostics: &diagnostics,
            events: &events,
            guardrails: &guardrails,
            concurrency: self.settings.concurrency,
        };

        self.check_cancelled()?;
        self.transition(RunState::GeneratingPersonas);
        self.prewarm_personas(&dispatcher).await;

        self.transition(RunState::ProcessingWindows);
        let first = PassSettings::first(&self.settings.thresholds);
        for window in &windows {
            self.check_cancelled()?;
            dispatcher.process_window(window, &first, None).await;
        }

        self.transition(RunState::SecondPass);
        let carried = outstanding_questions(
            &registry,
            &accumulator,
            self.settings.thresholds.acceptance_floor,
        );
        info!(questions = carried.len(), "Starting second pass");
        self.events.emit(ProgressEvent::SecondPassStarted {
            question_count: carried.len(),
        });
        if !carried.is_empty() {
            let second = PassSettings::second(&self.settings.thresholds);
            let scope = question_scope(&carried);
            for window in &windows {
                self.check_cancelled()?;
                dispatcher.process_window(window, &second, Some(&scope)).await;
            }
        }
        drop(dispatcher);

        self.transition(RunState::Compiling);
        let questions_answered = accumulator.answered_count();
        let answers = accumulator.finalize();

        self.transition(RunState::Done);
        self.events.emit(ProgressEvent::Done {
            questions_answered,
            total_questions: registry.question_count(),
        });
        info!(
            answered = questions_answered,
            total = registry.question_count(),
            "Run complete"
        );

        Ok(RunOutcome {
            page_count: pages.len(),
            window_count: windows.len(),
            second_pass_questions: carried.len(),
            budget: budget.report(),
            diagnostics: diagnostics.snapshot(),
            duration: started.elapsed(),
            answers,
            registry,
        })
    }

    /// Generates every section's persona up front, bounded by the
    /// concurrency limit. Failures are left for windows to retry.
    async fn prewarm_personas(&self, dispatcher: &Dispatcher<'_>) {
        let registry = dispatcher.registry;
        let results: Vec<_> = stream::iter(registry.sections())
            .map(|section| async move {
                let questions = registry.section_questions(section);
                let result = dispatcher
                    .personas
                    .get_or_generate(dispatcher.oracle, section, &questions)
                    .await;
                (section, result)
            })
            .buffer_unordered(dispatcher.concurrency.max(1))
            .collect()
            .await;

        for (section, result) in results {
            match result {
                Ok(lookup) => {
                    if lookup.generated {
                        self.events.emit(ProgressEvent::PersonaReady {
                            section_id: section.id.clone(),
                        });
                    }
                }
                Err(e) => {
                    dispatcher.diagnostics.record_persona_failure();
                    warn!(section = %section.id, "Persona generation failed: {}", e);
                    self.events.emit(ProgressEvent::Error {
                        stage: "persona".to_string(),
                        message: format!("section '{}': {}", section.id, e),
                    });
                }
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), AnalysisError> {
        if self.cancel.is_cancelled() {
            Err(AnalysisError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn transition(&mut self, to: RunState) {
        let from = self.state;
        if from == to || from.is_terminal() {
            return;
        }
        self.state = to;
        info!("Run state: {} -> {}", from, to);
        self.events.emit(ProgressEvent::StateChanged { from, to });
    }
}
