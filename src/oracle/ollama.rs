//! Ollama-backed oracle.
//!
//! Personas and answers are both produced with plain (tool-less) chat
//! calls against `/api/chat`. Answers come back as one JSON object per
//! line, which keeps parsing tolerant of chatty models.

use crate::error::OracleError;
use crate::models::{Persona, Question, Section};
use crate::oracle::{AnswerOptions, Oracle, OracleReply, RawAnswer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection and sampling settings for the Ollama oracle.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub ollama_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
    /// Cap on generated tokens per call.
    pub max_tokens: Option<usize>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            model_name: "llama3.2:latest".to_string(),
            temperature: 0.1,
            timeout_seconds: 300,
            max_tokens: None,
        }
    }
}

/// Message in a chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<usize>,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Chat completion content plus reported token usage.
struct ChatOutput {
    content: String,
    tokens_used: Option<u64>,
}

/// Oracle backed by a local or remote Ollama server.
pub struct OllamaOracle {
    config: OllamaConfig,
    http_client: reqwest::Client,
}

impl OllamaOracle {
    /// Create a new oracle with its own HTTP client.
    pub fn new(config: OllamaConfig) -> Result<Self, OracleError> {
        info!(
            "Initializing Ollama oracle with model {} at {}",
            config.model_name, config.ollama_url
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| OracleError::Failed(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Send a system + user prompt pair and return the reply content.
    async fn send_chat(&self, system: &str, prompt: &str) -> Result<ChatOutput, OracleError> {
        let url = format!("{}/api/chat", self.config.ollama_url.trim_end_matches('/'));

        let request = OllamaChatRequest {
            model: self.config.model_name.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(prompt)],
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
        };

        debug!("Sending chat request ({} prompt chars)", prompt.len());

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout(self.config.timeout_seconds)
                } else if e.is_connect() {
                    OracleError::Failed(format!(
                        "cannot connect to Ollama at {}. Is Ollama running?",
                        self.config.ollama_url
                    ))
                } else {
                    OracleError::Failed(format!("failed to send request: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Failed(format!(
                "Ollama API error {}: {}",
                status, body
            )));
        }

        let chat_response: OllamaChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout(self.config.timeout_seconds)
            } else {
                OracleError::MalformedResponse(format!("failed to parse Ollama response: {}", e))
            }
        })?;

        let tokens_used = match (chat_response.prompt_eval_count, chat_response.eval_count) {
            (None, None) => None,
            (prompt, eval) => Some(prompt.unwrap_or(0) + eval.unwrap_or(0)),
        };

        Ok(ChatOutput {
            content: chat_response.message.content,
            tokens_used,
        })
    }
}

#[async_trait]
impl Oracle for OllamaOracle {
    async fn generate_persona(
        &self,
        section: &Section,
        questions: &[Question],
    ) -> Result<Persona, OracleError> {
        let prompt = build_persona_prompt(section, questions);
        let output = self.send_chat(PERSONA_SYSTEM_PROMPT, &prompt).await?;

        let descriptor = output.content.trim();
        if descriptor.is_empty() {
            return Err(OracleError::MalformedResponse(format!(
                "empty persona for section '{}'",
                section.id
            )));
        }

        Ok(Persona {
            section_id: section.id.clone(),
            descriptor: descriptor.to_string(),
        })
    }

    async fn answer(
        &self,
        persona: &Persona,
        window_text: &str,
        questions: &[Question],
        options: &AnswerOptions,
    ) -> Result<OracleReply, OracleError> {
        let system = build_answer_system_prompt(persona, options);
        let prompt = build_answer_prompt(window_text, questions);

        let output = self.send_chat(&system, &prompt).await?;
        let (answers, unparsed) = parse_answers(&output.content)?;
        debug!(
            "Parsed {} answers ({} unparsed) for section {}",
            answers.len(),
            unparsed,
            persona.section_id
        );

        Ok(OracleReply {
            answers,
            unparsed,
            tokens_used: output.tokens_used,
        })
    }
}

/// Build the persona request for a section.
pub fn build_persona_prompt(section: &Section, questions: &[Question]) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("Section: {}\n\n", section.name));
    prompt.push_str("Questions this reviewer must answer:\n");
    for question in questions {
        prompt.push_str(&format!("- {}\n", question.text));
    }
    prompt.push_str("\nDescribe the reviewer persona in one paragraph, written in the second person (\"You are ...\").");
    prompt
}

/// Build the system prompt for an answer call: persona first, then rules.
pub fn build_answer_system_prompt(persona: &Persona, options: &AnswerOptions) -> String {
    let mut system = String::new();
    system.push_str(persona.descriptor.trim());
    system.push_str("\n\n");
    system.push_str(ANSWER_RULES);

    if options.broad_interpretation {
        system.push('\n');
        system.push_str(BROAD_INTERPRETATION_HINT);
    }
    if options.threshold_hint > 0.0 {
        system.push_str(&format!(
            "\n- Only report answers with confidence of at least {:.2}.",
            options.threshold_hint
        ));
    }
    for rule in &options.guardrails {
        system.push_str(&format!("\n- {}", rule.trim()));
    }

    system
}

/// Build the user prompt: the window text followed by the question batch.
pub fn build_answer_prompt(window_text: &str, questions: &[Question]) -> String {
    let mut prompt = String::new();
    prompt.push_str("=== DOCUMENT EXCERPT ===\n\n");
    prompt.push_str(window_text);
    prompt.push_str("=== END OF EXCERPT ===\n\n");
    prompt.push_str("=== QUESTIONS ===\n");
    for question in questions {
        prompt.push_str(&format!("[{}] {}\n", question.id, question.text));
    }
    prompt.push_str("\nFor each question the excerpt answers, output one JSON object per line:\n");
    prompt.push_str(r#"{"question_id": "id", "answer": "answer text", "pages": [3, 4], "confidence": 0.85}"#);
    prompt.push_str("\n\nSkip questions the excerpt does not answer. Only output JSON, no other text.");
    prompt
}

/// Parse answers from a model reply.
///
/// Accepts a JSON array of answer objects, or one object per line (code
/// fences and prose lines are ignored). Returns the parsed answers and the
/// number of JSON-looking entries that did not parse. A reply whose
/// JSON-looking entries all fail to parse is malformed.
pub fn parse_answers(response: &str) -> Result<(Vec<RawAnswer>, usize), OracleError> {
    let trimmed = strip_code_fence(response.trim());

    if trimmed.starts_with('[') {
        if let Ok(values) = serde_json::from_str::<Vec<Value>>(trimmed) {
            return Ok(collect_values(values));
        }
    }

    let mut answers = Vec::new();
    let mut unparsed = 0;

    for line in trimmed.lines() {
        let line = line.trim().trim_end_matches(',');
        if !line.starts_with('{') {
            continue;
        }

        match serde_json::from_str::<RawAnswer>(line) {
            Ok(answer) => answers.push(answer),
            Err(e) => {
                debug!("Unparsable answer line: {}", e);
                unparsed += 1;
            }
        }
    }

    if answers.is_empty() && unparsed > 0 {
        warn!("None of {} answer lines could be parsed", unparsed);
        return Err(OracleError::MalformedResponse(format!(
            "{} answer lines, none parsable",
            unparsed
        )));
    }

    Ok((answers, unparsed))
}

fn collect_values(values: Vec<Value>) -> (Vec<RawAnswer>, usize) {
    let mut answers = Vec::new();
    let mut unparsed = 0;

    for value in values {
        match serde_json::from_value::<RawAnswer>(value) {
            Ok(answer) => answers.push(answer),
            Err(_) => unparsed += 1,
        }
    }

    (answers, unparsed)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.trim_end().trim_end_matches("```").trim()
}

/// System prompt for persona generation
const PERSONA_SYSTEM_PROMPT: &str = r#"You design reviewer personas for analysing long technical documents.
Given a section of a questionnaire, describe the expert best suited to answer it:
their domain, what evidence they look for, and how strictly they read.
Output only the persona paragraph."#;

/// Rules shared by every answer call
const ANSWER_RULES: &str = r#"Rules:
- Answer only from the excerpt; never use outside knowledge.
- Every answer must cite the page numbers shown in the [Page N] markers that support it.
- Confidence is a number between 0 and 1.
- Output each answer as a JSON object on its own line. Only output valid JSON."#;

/// Extra latitude requested on the second pass
const BROAD_INTERPRETATION_HINT: &str = "- These questions were not answered on a first reading. Interpret them broadly: indirect, partial or implied evidence counts, as long as you cite it.";
