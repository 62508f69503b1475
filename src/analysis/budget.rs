//! Prompt budget governor.
//!
//! Token cost is estimated from character counts. When a window does not
//! fit under the prompt ceiling together with the persona and question
//! batch, trailing pages are dropped first, then trailing characters of
//! the last remaining page. The earliest pages always survive longest.
//! A page whose text would be cut down to its bare marker is dropped.

use crate::models::{BudgetReport, Persona, Question, Window};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Budget settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Maximum estimated prompt tokens per oracle call.
    pub prompt_token_ceiling: u64,
    /// Characters per token in the length heuristic.
    pub chars_per_token: usize,
    /// Tokens reserved for fixed instructions and formatting.
    pub prompt_overhead_tokens: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            prompt_token_ceiling: 24_000,
            chars_per_token: 4,
            prompt_overhead_tokens: 400,
        }
    }
}

/// Window text after fitting it to the budget.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedWindow {
    pub text: String,
    /// Pages with at least some of their text present in `text`.
    pub pages_kept: Vec<u32>,
    pub pages_dropped: usize,
    pub chars_dropped: usize,
    /// Estimated tokens of the whole call after trimming.
    pub estimated_tokens: u64,
}

impl FittedWindow {
    pub fn was_trimmed(&self) -> bool {
        self.chars_dropped > 0
    }
}

/// Estimates and trims per-call context, and keeps the run's budget report.
#[derive(Debug, Default)]
pub struct BudgetGovernor {
    config: BudgetConfig,
    calls_issued: AtomicU64,
    tokens_estimated: AtomicU64,
    tokens_recorded: AtomicU64,
}

impl BudgetGovernor {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Estimated tokens for `chars` characters.
    pub fn estimate_chars(&self, chars: usize) -> u64 {
        chars.div_ceil(self.config.chars_per_token.max(1)) as u64
    }

    /// Estimated tokens of everything in a call except the window text.
    pub fn fixed_cost(&self, persona: &Persona, questions: &[Question]) -> u64 {
        let question_chars: usize = questions
            .iter()
            .map(|q| q.id.chars().count() + q.text.chars().count() + 4)
            .sum();
        self.config.prompt_overhead_tokens
            + self.estimate_chars(persona.descriptor.chars().count())
            + self.estimate_chars(question_chars)
    }

    /// Fits a window under the configured ceiling. Never fails; in the
    /// worst case the window text is empty.
    pub fn fit(&self, window: &Window, persona: &Persona, questions: &[Question]) -> FittedWindow {
        self.fit_with_ceiling(window, persona, questions, self.config.prompt_token_ceiling)
    }

    pub fn fit_with_ceiling(
        &self,
        window: &Window,
        persona: &Persona,
        questions: &[Question],
        ceiling: u64,
    ) -> FittedWindow {
        let fixed = self.fixed_cost(persona, questions);
        let total_chars = window.text.chars().count();

        if fixed + self.estimate_chars(total_chars) <= ceiling {
            return FittedWindow {
                text: window.text.clone(),
                pages_kept: window.page_numbers(),
                pages_dropped: 0,
                chars_dropped: 0,
                estimated_tokens: fixed + self.estimate_chars(total_chars),
            };
        }

        let available_tokens = ceiling.saturating_sub(fixed);
        let max_chars = (available_tokens as usize).saturating_mul(self.config.chars_per_token.max(1));

        // Drop whole pages from the end while more than one remains.
        let rendered: Vec<String> = window.pages.iter().map(|p| p.render()).collect();
        let mut kept = rendered.len();
        let mut kept_chars = total_chars;
        while kept > 1 && kept_chars > max_chars {
            kept -= 1;
            kept_chars -= rendered[kept].chars().count();
        }

        let mut text: String = rendered[..kept].concat();
        if kept_chars > max_chars {
            let last = &window.pages[kept - 1];
            let before: usize = rendered[..kept - 1].iter().map(|r| r.chars().count()).sum();
            let content_starts = before + last.marker().chars().count();

            // A page only counts as sent if some of its text survives the cut.
            if last.text.is_empty() || max_chars <= content_starts {
                kept -= 1;
                text = rendered[..kept].concat();
            } else {
                text = text.chars().take(max_chars).collect();
            }
        }

        let text_chars = text.chars().count();
        let pages_kept: Vec<u32> = window.pages[..kept].iter().map(|p| p.number).collect();

        let fitted = FittedWindow {
            pages_dropped: window.pages.len() - pages_kept.len(),
            chars_dropped: total_chars - text_chars,
            estimated_tokens: fixed + self.estimate_chars(text_chars),
            pages_kept,
            text,
        };

        warn!(
            window = window.index,
            section = %persona.section_id,
            pages_dropped = fitted.pages_dropped,
            chars_dropped = fitted.chars_dropped,
            "Window trimmed to fit prompt budget of {} tokens",
            ceiling
        );

        fitted
    }

    /// Count an oracle call and its estimated size.
    pub fn record_call(&self, estimated_tokens: u64) {
        self.calls_issued.fetch_add(1, Ordering::Relaxed);
        self.tokens_estimated
            .fetch_add(estimated_tokens, Ordering::Relaxed);
    }

    /// Record tokens the oracle reported having used.
    pub fn record_usage(&self, tokens: u64) {
        self.tokens_recorded.fetch_add(tokens, Ordering::Relaxed);
    }

    pub fn report(&self) -> BudgetReport {
        BudgetReport {
            calls_issued: self.calls_issued.load(Ordering::Relaxed),
            tokens_estimated: self.tokens_estimated.load(Ordering::Relaxed),
            tokens_recorded: self.tokens_recorded.load(Ordering::Relaxed),
        }
    }
}
