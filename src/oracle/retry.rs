//! Exponential-backoff retry wrapper for oracle calls.
//!
//! Only transient failures (transport errors, timeouts) are retried.
//! A malformed reply is returned as-is: asking the same model the same
//! question again rarely fixes its output format and costs a full call.

use crate::error::OracleError;
use crate::models::{Persona, Question, Section};
use crate::oracle::{AnswerOptions, Oracle, OracleReply};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How many times, and how patiently, to re-issue a failed call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self::default()
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt as i32);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Run `call` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, OracleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OracleError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed ({}); retry {}/{} in {:?}",
                        what,
                        e,
                        attempt + 1,
                        self.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Wraps an oracle so every call goes through a [`RetryPolicy`].
pub struct RetryingOracle<O> {
    inner: O,
    policy: RetryPolicy,
}

impl<O: Oracle> RetryingOracle<O> {
    pub fn new(inner: O, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<O: Oracle> Oracle for RetryingOracle<O> {
    async fn generate_persona(
        &self,
        section: &Section,
        questions: &[Question],
    ) -> Result<Persona, OracleError> {
        let what = format!("persona generation for section '{}'", section.id);
        self.policy
            .run(&what, || self.inner.generate_persona(section, questions))
            .await
    }

    async fn answer(
        &self,
        persona: &Persona,
        window_text: &str,
        questions: &[Question],
        options: &AnswerOptions,
    ) -> Result<OracleReply, OracleError> {
        let what = format!("answer call for section '{}'", persona.section_id);
        self.policy
            .run(&what, || {
                self.inner.answer(persona, window_text, questions, options)
            })
            .await
    }
}
