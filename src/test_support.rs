//! Shared fixtures for unit tests: a scripted oracle and small builders.

use crate::error::OracleError;
use crate::models::{Page, Persona, Question, Section};
use crate::oracle::{AnswerOptions, Oracle, OracleReply, RawAnswer};
use crate::questions::{QuestionRegistry, RegistryConfig, SectionEntry};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// What the scripted oracle saw on one `answer` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptCall {
    pub section_id: String,
    /// Page numbers found in the window text markers.
    pub pages: Vec<u32>,
    pub question_ids: Vec<String>,
    pub broad_interpretation: bool,
    pub threshold_hint: f64,
}

type Script = dyn Fn(&ScriptCall) -> Result<OracleReply, OracleError> + Send + Sync;

/// In-memory oracle whose answers come from a closure.
pub struct ScriptedOracle {
    script: Box<Script>,
    calls: Mutex<Vec<ScriptCall>>,
    persona_calls: Mutex<HashMap<String, usize>>,
    persona_failures: Mutex<HashMap<String, usize>>,
    persona_delay: Duration,
    answer_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&ScriptCall) -> Result<OracleReply, OracleError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
            persona_calls: Mutex::new(HashMap::new()),
            persona_failures: Mutex::new(HashMap::new()),
            persona_delay: Duration::ZERO,
            answer_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Answers nothing, successfully.
    pub fn silent() -> Self {
        Self::new(|_| Ok(OracleReply::default()))
    }

    pub fn with_persona_delay_ms(mut self, ms: u64) -> Self {
        self.persona_delay = Duration::from_millis(ms);
        self
    }

    pub fn with_answer_delay_ms(mut self, ms: u64) -> Self {
        self.answer_delay = Duration::from_millis(ms);
        self
    }

    /// The first `times` persona generations for these sections fail.
    pub fn failing_personas(self, sections: &[&str], times: usize) -> Self {
        {
            let mut failures = self.persona_failures.lock().unwrap();
            for section in sections {
                failures.insert(section.to_string(), times);
            }
        }
        self
    }

    pub fn calls(&self) -> Vec<ScriptCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn persona_calls(&self, section_id: &str) -> usize {
        self.persona_calls
            .lock()
            .unwrap()
            .get(section_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn generate_persona(
        &self,
        section: &Section,
        _questions: &[Question],
    ) -> Result<Persona, OracleError> {
        *self
            .persona_calls
            .lock()
            .unwrap()
            .entry(section.id.clone())
            .or_default() += 1;

        if !self.persona_delay.is_zero() {
            tokio::time::sleep(self.persona_delay).await;
        }

        {
            let mut failures = self.persona_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&section.id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(OracleError::Failed("persona unavailable".to_string()));
                }
            }
        }

        Ok(Persona {
            section_id: section.id.clone(),
            descriptor: format!("You review {}.", section.name),
        })
    }

    async fn answer(
        &self,
        persona: &Persona,
        window_text: &str,
        questions: &[Question],
        options: &AnswerOptions,
    ) -> Result<OracleReply, OracleError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let call = ScriptCall {
            section_id: persona.section_id.clone(),
            pages: page_markers(window_text),
            question_ids: questions.iter().map(|q| q.id.clone()).collect(),
            broad_interpretation: options.broad_interpretation,
            threshold_hint: options.threshold_hint,
        };
        self.calls.lock().unwrap().push(call.clone());

        if !self.answer_delay.is_zero() {
            tokio::time::sleep(self.answer_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        (self.script)(&call)
    }
}

/// Page numbers of the `[Page N]` markers in rendered window text.
pub fn page_markers(text: &str) -> Vec<u32> {
    text.lines()
        .filter_map(|line| line.strip_prefix("[Page ")?.strip_suffix(']')?.parse().ok())
        .collect()
}

pub fn raw(question_id: &str, text: &str, pages: &[u32], confidence: f64) -> RawAnswer {
    RawAnswer {
        question_id: Some(question_id.to_string()),
        answer: Some(text.to_string()),
        pages: pages.to_vec(),
        confidence: Some(confidence),
    }
}

pub fn reply(answers: Vec<RawAnswer>) -> Result<OracleReply, OracleError> {
    Ok(OracleReply {
        answers,
        ..Default::default()
    })
}

pub fn section(id: &str, question_ids: &[&str]) -> Section {
    Section {
        id: id.to_string(),
        name: format!("Section {}", id),
        question_ids: question_ids.iter().map(|q| q.to_string()).collect(),
    }
}

/// Registry from `(section, [question ids])` pairs.
pub fn registry(layout: &[(&str, &[&str])]) -> QuestionRegistry {
    let config = RegistryConfig {
        sections: layout
            .iter()
            .map(|(id, _)| SectionEntry {
                id: id.to_string(),
                name: format!("Section {}", id),
            })
            .collect(),
        questions: layout
            .iter()
            .flat_map(|(section_id, ids)| {
                ids.iter().map(move |id| Question {
                    id: id.to_string(),
                    section_id: section_id.to_string(),
                    text: format!("Question {}?", id),
                    required: false,
                })
            })
            .collect(),
    };
    QuestionRegistry::new(config).unwrap()
}

/// Pages numbered from 1 with the given texts.
pub fn pages(texts: &[&str]) -> Vec<Page> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| Page::new(i as u32 + 1, *text))
        .collect()
}
