//! Answer compilation.
//!
//! Turns a finished run into the canonical answer set: one entry per
//! question in registry order, with the primary answer, every alternate
//! finding, and the run's budget and diagnostics.

use crate::analysis::{DiagnosticsSnapshot, RunOutcome};
use crate::models::{AnswerStatus, AnswerVariant, BudgetReport, QuestionId, SectionId};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Run details recorded next to the answers.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledMetadata {
    /// Description of the analysed document.
    pub source: String,
    pub generated_at: DateTime<Utc>,
    pub model_used: String,
    pub page_count: usize,
    pub window_count: usize,
    pub second_pass_questions: usize,
    pub duration_seconds: f64,
}

/// Final result for one question.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionResult {
    pub question_id: QuestionId,
    pub section_id: SectionId,
    pub question: String,
    pub required: bool,
    pub status: AnswerStatus,
    pub primary: Option<AnswerVariant>,
    /// Every other variant, in discovery order.
    pub alternates: Vec<AnswerVariant>,
}

impl QuestionResult {
    /// One console line: status, question id, and where the primary answer
    /// was found, e.g. `🟢 q1: pages 3-5, 9 (0.90)`.
    pub fn summary_line(&self) -> String {
        match &self.primary {
            Some(primary) => format!(
                "{} {}: pages {} ({:.2})",
                self.status.emoji(),
                self.question_id,
                primary.page_ranges(),
                primary.confidence
            ),
            None => format!("{} {}: no answer", self.status.emoji(), self.question_id),
        }
    }
}

/// Status counts over all questions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnswerSummary {
    pub total: usize,
    pub answered: usize,
    pub low_confidence: usize,
    pub unanswered: usize,
    /// Required questions that ended without any answer.
    pub required_unanswered: Vec<QuestionId>,
}

/// The complete compiled answer set.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledAnswers {
    pub metadata: CompiledMetadata,
    pub questions: Vec<QuestionResult>,
    pub summary: AnswerSummary,
    pub budget: BudgetReport,
    pub diagnostics: DiagnosticsSnapshot,
}

/// Compiles a finished run. A primary answer at or above
/// `acceptance_floor` counts as answered, anything below as low confidence.
pub fn compile(
    outcome: &RunOutcome,
    source: &str,
    model_used: &str,
    acceptance_floor: f64,
) -> CompiledAnswers {
    let questions: Vec<QuestionResult> = outcome
        .registry
        .questions()
        .map(|question| {
            let (primary, alternates) = outcome.answers.primary_and_alternates(&question.id);
            let status = match primary {
                None => AnswerStatus::Unanswered,
                Some(p) if p.confidence >= acceptance_floor => AnswerStatus::Answered,
                Some(_) => AnswerStatus::LowConfidence,
            };
            QuestionResult {
                question_id: question.id.clone(),
                section_id: question.section_id.clone(),
                question: question.text.clone(),
                required: question.required,
                status,
                primary: primary.cloned(),
                alternates: alternates.into_iter().cloned().collect(),
            }
        })
        .collect();

    let summary = summarize(&questions);

    CompiledAnswers {
        metadata: CompiledMetadata {
            source: source.to_string(),
            generated_at: Utc::now(),
            model_used: model_used.to_string(),
            page_count: outcome.page_count,
            window_count: outcome.window_count,
            second_pass_questions: outcome.second_pass_questions,
            duration_seconds: outcome.duration.as_secs_f64(),
        },
        questions,
        summary,
        budget: outcome.budget,
        diagnostics: outcome.diagnostics,
    }
}

fn summarize(questions: &[QuestionResult]) -> AnswerSummary {
    let mut summary = AnswerSummary {
        total: questions.len(),
        ..Default::default()
    };

    for q in questions {
        match q.status {
            AnswerStatus::Answered => summary.answered += 1,
            AnswerStatus::LowConfidence => summary.low_confidence += 1,
            AnswerStatus::Unanswered => {
                summary.unanswered += 1;
                if q.required {
                    summary.required_unanswered.push(q.question_id.clone());
                }
            }
        }
    }

    summary
}

/// Pretty JSON of the compiled answers.
pub fn generate_json_report(answers: &CompiledAnswers) -> Result<String> {
    serde_json::to_string_pretty(answers).map_err(Into::into)
}

/// Writes the compiled answers to `path` as JSON.
pub fn write_report(answers: &CompiledAnswers, path: &Path) -> Result<()> {
    let content = generate_json_report(answers)?;

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content.as_bytes())?;
    file.write_all(b"\n")?;

    Ok(())
}
