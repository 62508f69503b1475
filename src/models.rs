//! Data models for document analysis.
//!
//! This module contains the core data structures shared across the
//! pipeline: pages and windows of the document, the static question
//! battery, personas, and the candidate/accumulated answers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of a question in the registry.
pub type QuestionId = String;

/// Identifier of a section in the registry.
pub type SectionId = String;

/// One extracted page of the document. Page numbers start at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 1-indexed page number.
    pub number: u32,
    /// Extracted page text.
    pub text: String,
    /// Length of `text` in characters.
    pub char_count: usize,
}

impl Page {
    /// Creates a page, computing its character count.
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        let text = text.into();
        let char_count = text.chars().count();
        Self {
            number,
            text,
            char_count,
        }
    }

    /// Citation marker that precedes the page text, e.g. `[Page 3]\n`.
    pub fn marker(&self) -> String {
        format!("[Page {}]\n", self.number)
    }

    /// Renders the page the way the oracle sees it, with a citation marker.
    pub fn render(&self) -> String {
        format!("{}{}\n\n", self.marker(), self.text)
    }
}

/// A contiguous slice of pages processed as one unit of context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Window {
    /// 0-indexed position of the window in the document.
    pub index: usize,
    /// Pages of the window, in page order.
    pub pages: Vec<Page>,
    /// Concatenation of the rendered pages, in page order.
    pub text: String,
}

impl Window {
    /// Builds a window from its pages.
    pub fn new(index: usize, pages: Vec<Page>) -> Self {
        let text = pages.iter().map(Page::render).collect();
        Self { index, pages, text }
    }

    /// Page numbers covered by this window.
    pub fn page_numbers(&self) -> Vec<u32> {
        self.pages.iter().map(|p| p.number).collect()
    }
}

/// A question of the static battery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    #[serde(rename = "section")]
    pub section_id: SectionId,
    pub text: String,
    #[serde(default)]
    pub required: bool,
}

/// A group of questions answered under one persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub id: SectionId,
    pub name: String,
    /// Question ids in registry order. Never empty.
    pub question_ids: Vec<QuestionId>,
}

/// Section-specific instruction payload shaping how the oracle reads a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Persona {
    pub section_id: SectionId,
    pub descriptor: String,
}

/// A validated answer proposed by the oracle for one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateAnswer {
    pub question_id: QuestionId,
    pub text: String,
    /// Cited pages. Non-empty once validated.
    pub pages: BTreeSet<u32>,
    /// Self-reported confidence in [0, 1].
    pub confidence: f64,
    pub window_index: usize,
}

/// One distinct accumulated answer for a question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerVariant {
    pub question_id: QuestionId,
    pub text: String,
    /// Union of all cited pages. Only ever grows.
    pub pages: BTreeSet<u32>,
    /// Highest confidence seen.
    pub confidence: f64,
    /// Windows that contributed, in first-contribution order.
    pub contributing_windows: Vec<usize>,
    pub merge_count: u32,
}

impl AnswerVariant {
    /// Seeds a new variant from a candidate.
    pub fn seed(candidate: &CandidateAnswer) -> Self {
        Self {
            question_id: candidate.question_id.clone(),
            text: candidate.text.clone(),
            pages: candidate.pages.clone(),
            confidence: candidate.confidence,
            contributing_windows: vec![candidate.window_index],
            merge_count: 0,
        }
    }

    /// Window in which this variant was first discovered.
    pub fn first_seen_window(&self) -> usize {
        self.contributing_windows.first().copied().unwrap_or(usize::MAX)
    }

    /// Cited pages as a compact string, e.g. `3-5, 9`.
    pub fn page_ranges(&self) -> String {
        let mut ranges: Vec<String> = Vec::new();
        let mut iter = self.pages.iter().copied().peekable();

        while let Some(start) = iter.next() {
            let mut end = start;
            while iter.peek() == Some(&(end + 1)) {
                end += 1;
                iter.next();
            }
            if start == end {
                ranges.push(start.to_string());
            } else {
                ranges.push(format!("{}-{}", start, end));
            }
        }

        ranges.join(", ")
    }
}

/// Outcome of a question after compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    /// Primary answer meets the acceptance floor.
    Answered,
    /// Some answer exists, but below the acceptance floor.
    LowConfidence,
    /// No answer was found anywhere in the document.
    Unanswered,
}

impl fmt::Display for AnswerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerStatus::Answered => write!(f, "Answered"),
            AnswerStatus::LowConfidence => write!(f, "Low confidence"),
            AnswerStatus::Unanswered => write!(f, "Unanswered"),
        }
    }
}

impl AnswerStatus {
    /// Returns an emoji representation of the status.
    pub fn emoji(&self) -> &'static str {
        match self {
            AnswerStatus::Answered => "🟢",
            AnswerStatus::LowConfidence => "🟡",
            AnswerStatus::Unanswered => "🔴",
        }
    }
}

/// Snapshot of the per-run oracle budget counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetReport {
    /// Oracle answer calls issued.
    pub calls_issued: u64,
    /// Tokens estimated by the length heuristic before each call.
    pub tokens_estimated: u64,
    /// Tokens the oracle reported having used.
    pub tokens_recorded: u64,
}
