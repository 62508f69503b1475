//! Question-answering oracle.
//!
//! The core only depends on the [`Oracle`] trait. The Ollama-backed
//! implementation and the retry wrapper live in submodules.

pub mod ollama;
pub mod retry;

pub use ollama::{OllamaConfig, OllamaOracle};
pub use retry::{RetryPolicy, RetryingOracle};

use crate::error::OracleError;
use crate::models::{Persona, Question, Section};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-call instructions passed alongside a question batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerOptions {
    /// Minimum confidence the oracle should bother reporting.
    pub threshold_hint: f64,
    /// Ask the oracle for broader interpretive latitude (second pass).
    pub broad_interpretation: bool,
    /// Extra rules appended to the instructions.
    pub guardrails: Vec<String>,
}

impl Default for AnswerOptions {
    fn default() -> Self {
        Self {
            threshold_hint: 0.0,
            broad_interpretation: false,
            guardrails: Vec::new(),
        }
    }
}

/// An answer as the oracle emitted it, before boundary validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAnswer {
    #[serde(default)]
    pub question_id: Option<String>,
    #[serde(default, alias = "text")]
    pub answer: Option<String>,
    #[serde(default)]
    pub pages: Vec<u32>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Result of one `answer` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OracleReply {
    pub answers: Vec<RawAnswer>,
    /// Answer entries present in the reply that could not be parsed.
    pub unparsed: usize,
    /// Tokens the oracle reports having used, when it reports them.
    pub tokens_used: Option<u64>,
}

/// The question-answering collaborator.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Produces the persona descriptor for a section.
    async fn generate_persona(
        &self,
        section: &Section,
        questions: &[Question],
    ) -> Result<Persona, OracleError>;

    /// Answers a batch of questions from one window of text.
    async fn answer(
        &self,
        persona: &Persona,
        window_text: &str,
        questions: &[Question],
        options: &AnswerOptions,
    ) -> Result<OracleReply, OracleError>;
}

#[async_trait]
impl<O: Oracle + ?Sized> Oracle for std::sync::Arc<O> {
    async fn generate_persona(
        &self,
        section: &Section,
        questions: &[Question],
    ) -> Result<Persona, OracleError> {
        (**self).generate_persona(section, questions).await
    }

    async fn answer(
        &self,
        persona: &Persona,
        window_text: &str,
        questions: &[Question],
        options: &AnswerOptions,
    ) -> Result<OracleReply, OracleError> {
        (**self).answer(persona, window_text, questions, options).await
    }
}
