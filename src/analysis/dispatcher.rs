//! Per-window dispatch of oracle calls.
//!
//! A window gets one oracle call per section that still has outstanding
//! questions. Calls run concurrently up to the configured limit, and every
//! call settles (answer or failure) before anything from the window is
//! merged. One section failing never stops its siblings.

use crate::analysis::accumulator::Accumulator;
use crate::analysis::budget::BudgetGovernor;
use crate::analysis::diagnostics::Diagnostics;
use crate::analysis::events::{ProgressEvent, ProgressSink};
use crate::analysis::personas::PersonaCache;
use crate::analysis::second_pass::PassSettings;
use crate::error::{OracleError, Rejection};
use crate::models::{CandidateAnswer, Question, QuestionId, Section, SectionId, Window};
use crate::oracle::{AnswerOptions, Oracle, OracleReply, RawAnswer};
use crate::questions::QuestionRegistry;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// Default number of concurrent section calls per window.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Everything a window dispatch reads or writes, borrowed from the run.
pub struct Dispatcher<'a> {
    pub oracle: &'a dyn Oracle,
    pub registry: &'a QuestionRegistry,
    pub personas: &'a PersonaCache,
    pub budget: &'a BudgetGovernor,
    pub accumulator: &'a Accumulator,
    pub diagnostics: &'a Diagnostics,
    pub events: &'a ProgressSink,
    pub guardrails: &'a [String],
    pub concurrency: usize,
}

/// Why a section call produced nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionFailure {
    Persona(OracleError),
    Answer(OracleError),
}

impl SectionFailure {
    fn stage(&self) -> &'static str {
        match self {
            SectionFailure::Persona(_) => "persona",
            SectionFailure::Answer(_) => "dispatch",
        }
    }

    fn error(&self) -> &OracleError {
        match self {
            SectionFailure::Persona(e) | SectionFailure::Answer(e) => e,
        }
    }
}

/// Result of one section's call for a window.
#[derive(Debug)]
struct SectionCall {
    section_id: SectionId,
    asked: Vec<QuestionId>,
    pages_sent: Vec<u32>,
    result: Result<OracleReply, SectionFailure>,
}

/// Summary of one processed window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowOutcome {
    pub window_index: usize,
    pub sections_called: usize,
    pub sections_failed: usize,
    /// Candidates stored in the accumulator (appended or merged).
    pub answers_found: usize,
    pub answers_dropped: usize,
}

impl<'a> Dispatcher<'a> {
    /// Processes one window. `scope` restricts which questions may be
    /// asked at all; `None` means every question.
    pub async fn process_window(
        &self,
        window: &Window,
        settings: &PassSettings,
        scope: Option<&BTreeSet<QuestionId>>,
    ) -> WindowOutcome {
        self.events.emit(ProgressEvent::WindowStarted {
            pass: settings.pass,
            index: window.index,
            page_numbers: window.page_numbers(),
        });

        let batches: Vec<(&Section, Vec<Question>)> = self
            .registry
            .sections()
            .iter()
            .filter_map(|section| {
                let outstanding = self.outstanding(section, settings, scope);
                (!outstanding.is_empty()).then_some((section, outstanding))
            })
            .collect();

        debug!(
            window = window.index,
            pass = ?settings.pass,
            sections = batches.len(),
            "Dispatching window"
        );

        let mut calls: Vec<SectionCall> = stream::iter(batches)
            .map(|(section, questions)| self.call_section(window, section, questions, settings))
            .buffer_unordered(self.concurrency.max(1))
            .collect()
            .await;

        // Completion order is arbitrary; merge in registry order.
        calls.sort_by_key(|call| {
            self.registry
                .sections()
                .iter()
                .position(|s| s.id == call.section_id)
        });

        let mut outcome = WindowOutcome {
            window_index: window.index,
            sections_called: calls.len(),
            ..Default::default()
        };

        for call in calls {
            match call.result {
                Ok(reply) => {
                    let (stored, dropped) =
                        self.merge_reply(window.index, &call.asked, &call.pages_sent, reply, settings);
                    outcome.answers_found += stored;
                    outcome.answers_dropped += dropped;
                }
                Err(failure) => {
                    outcome.sections_failed += 1;
                    self.record_failure(window.index, &call.section_id, &failure);
                }
            }
        }

        info!(
            window = window.index,
            pass = ?settings.pass,
            answers = outcome.answers_found,
            failed = outcome.sections_failed,
            "Window processed"
        );

        self.events.emit(ProgressEvent::WindowFinished {
            pass: settings.pass,
            index: window.index,
            answers_found: outcome.answers_found,
        });

        outcome
    }

    /// Questions of a section still worth asking in this pass.
    fn outstanding(
        &self,
        section: &Section,
        settings: &PassSettings,
        scope: Option<&BTreeSet<QuestionId>>,
    ) -> Vec<Question> {
        self.registry
            .section_questions(section)
            .into_iter()
            .filter(|q| scope.map_or(true, |ids| ids.contains(&q.id)))
            .filter(|q| !self.accumulator.is_satisfied(&q.id, settings.satisfied_floor))
            .collect()
    }

    async fn call_section(
        &self,
        window: &Window,
        section: &Section,
        questions: Vec<Question>,
        settings: &PassSettings,
    ) -> SectionCall {
        let asked: Vec<QuestionId> = questions.iter().map(|q| q.id.clone()).collect();
        let mut call = SectionCall {
            section_id: section.id.clone(),
            asked,
            pages_sent: Vec::new(),
            result: Ok(OracleReply::default()),
        };

        let section_questions = self.registry.section_questions(section);
        let persona = match self
            .personas
            .get_or_generate(self.oracle, section, &section_questions)
            .await
        {
            Ok(lookup) => {
                if lookup.generated {
                    self.events.emit(ProgressEvent::PersonaReady {
                        section_id: section.id.clone(),
                    });
                }
                lookup.persona
            }
            Err(e) => {
                call.result = Err(SectionFailure::Persona(e));
                return call;
            }
        };

        let fitted = self.budget.fit(window, &persona, &questions);
        if fitted.was_trimmed() {
            self.diagnostics.record_budget_trim();
            self.events.emit(ProgressEvent::BudgetTrimmed {
                window_index: window.index,
                section_id: section.id.clone(),
                pages_dropped: fitted.pages_dropped,
                chars_dropped: fitted.chars_dropped,
            });
        }
        self.budget.record_call(fitted.estimated_tokens);
        call.pages_sent = fitted.pages_kept;

        let options = AnswerOptions {
            threshold_hint: settings.threshold_hint,
            broad_interpretation: settings.broad_interpretation,
            guardrails: self.guardrails.to_vec(),
        };

        call.result = self
            .oracle
            .answer(&persona, &fitted.text, &questions, &options)
            .await
            .map_err(SectionFailure::Answer);

        if let Ok(OracleReply {
            tokens_used: Some(tokens),
            ..
        }) = &call.result
        {
            self.budget.record_usage(*tokens);
        }

        call
    }

    /// Validates and merges a reply. Returns (stored, dropped).
    fn merge_reply(
        &self,
        window_index: usize,
        asked: &[QuestionId],
        pages_sent: &[u32],
        reply: OracleReply,
        settings: &PassSettings,
    ) -> (usize, usize) {
        let asked: HashSet<&str> = asked.iter().map(String::as_str).collect();
        let mut stored = 0;
        let mut dropped = reply.unparsed;
        self.diagnostics.record_unparsed(reply.unparsed);

        for raw in reply.answers {
            match to_candidate(raw, &asked, pages_sent, window_index) {
                Ok(candidate) => {
                    let outcome = self
                        .accumulator
                        .accept(settings.pass, candidate, settings.merge_threshold);
                    if outcome.is_stored() {
                        stored += 1;
                    }
                }
                Err(reason) => {
                    self.diagnostics.record_dropped(reason);
                    dropped += 1;
                }
            }
        }

        (stored, dropped)
    }

    fn record_failure(&self, window_index: usize, section_id: &str, failure: &SectionFailure) {
        match failure {
            SectionFailure::Persona(_) => self.diagnostics.record_persona_failure(),
            SectionFailure::Answer(e) => self.diagnostics.record_oracle_error(e),
        }
        warn!(
            window = window_index,
            section = %section_id,
            stage = failure.stage(),
            "Section call failed: {}",
            failure.error()
        );
        self.events.emit(ProgressEvent::Error {
            stage: failure.stage().to_string(),
            message: format!(
                "window {} section '{}': {}",
                window_index,
                section_id,
                failure.error()
            ),
        });
    }
}

/// Checks an oracle answer against what was asked and what was sent.
///
/// Citations outside the pages actually sent are discarded; an answer left
/// with none is malformed.
pub fn to_candidate(
    raw: RawAnswer,
    asked: &HashSet<&str>,
    pages_sent: &[u32],
    window_index: usize,
) -> Result<CandidateAnswer, Rejection> {
    let question_id = raw
        .question_id
        .filter(|id| asked.contains(id.as_str()))
        .ok_or(Rejection::UnknownQuestion)?;

    let text = raw
        .answer
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or(Rejection::EmptyText)?;

    let confidence = raw
        .confidence
        .filter(|c| c.is_finite() && (0.0..=1.0).contains(c))
        .ok_or(Rejection::ConfidenceOutOfRange)?;

    let pages: BTreeSet<u32> = raw
        .pages
        .into_iter()
        .filter(|p| pages_sent.contains(p))
        .collect();
    if pages.is_empty() {
        return Err(Rejection::MissingCitation);
    }

    Ok(CandidateAnswer {
        question_id,
        text,
        pages,
        confidence,
        window_index,
    })
}
