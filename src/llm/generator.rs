//! Core `AnswerGenerator` trait and `ApiGenerator` implementation.
//!
//! `ApiGenerator` calls any OpenAI-compatible `/v1/chat/completions` endpoint
//! (Ollama in OpenAI mode, OpenAI, Groq, LM Studio, vLLM, ...). All
//! connection details come from [`LlmConfig`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

use crate::config::LlmConfig;
use crate::llm::prompt::PromptBuilder;
use crate::text::sanitize_one_line;

// ---------------------------------------------------------------------------
// LlmError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("answer generation not configured: {0}")]
    ConfigMissing(&'static str),

    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("LLM request timed out")]
    Timeout,

    #[error("LLM HTTP {0}")]
    Status(u16),

    /// The HTTP response could not be parsed as expected JSON.
    #[error("failed to parse LLM response: {0}")]
    Parse(String),

    /// The LLM returned a response with no usable text content.
    #[error("LLM returned an empty response")]
    EmptyResponse,
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Answer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    /// Single-line reply text, not yet clamped.
    pub text: String,
    pub status: u16,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// AnswerGenerator trait
// ---------------------------------------------------------------------------

/// Async trait for reply generation.
///
/// Implementors must be `Send + Sync` so they can be shared with worker tasks
/// behind an `Arc<dyn AnswerGenerator>`.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, text: &str, timeout: Duration) -> Result<Answer, LlmError>;
}

// ---------------------------------------------------------------------------
// ApiGenerator
// ---------------------------------------------------------------------------

pub struct ApiGenerator {
    client: reqwest::Client,
    config: LlmConfig,
    prompt_builder: PromptBuilder,
}

impl ApiGenerator {
    /// The timeout is supplied per call, so the shared client carries none.
    pub fn from_config(config: &LlmConfig, max_answer_bytes: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            config: config.clone(),
            prompt_builder: PromptBuilder::new(&config.system_prompt, max_answer_bytes),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

/// Pull the first choice's content out of a chat-completions response.
fn extract_reply(json: &serde_json::Value) -> Result<String, LlmError> {
    let text = json["choices"][0]["message"]["content"]
        .as_str()
        .ok_or(LlmError::EmptyResponse)?;
    let text = sanitize_one_line(text);
    if text.is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(text)
}

#[async_trait]
impl AnswerGenerator for ApiGenerator {
    async fn generate(&self, text: &str, timeout: Duration) -> Result<Answer, LlmError> {
        if self.config.base_url.trim().is_empty() {
            return Err(LlmError::ConfigMissing("llm.base_url"));
        }
        let started = Instant::now();
        let (system_msg, user_msg) = self.prompt_builder.build_chat(text);

        let body = serde_json::json!({
            "model":       self.config.model,
            "messages": [
                { "role": "system", "content": system_msg },
                { "role": "user",   "content": user_msg   }
            ],
            "stream":      false,
            "temperature": self.config.temperature,
            "max_tokens":  self.config.max_tokens
        });

        let mut req = self.client.post(self.endpoint()).timeout(timeout).json(&body);

        // Attach Authorization only when api_key is a non-empty string.
        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }

        log::debug!(
            "llm: start timeout={}ms in_len={}",
            timeout.as_millis(),
            text.len()
        );
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            // Error bodies may echo the input; only the status is logged.
            log::info!("llm: http status={}", status.as_u16());
            return Err(LlmError::Status(status.as_u16()));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        Ok(Answer {
            text: extract_reply(&json)?,
            status: status.as_u16(),
            elapsed: started.elapsed(),
        })
    }
}

// ---------------------------------------------------------------------------
// MockGenerator  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub struct MockGenerator {
    response: Result<String, LlmError>,
    delay: Duration,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockGenerator {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            response: Ok(text.into()),
            delay: Duration::ZERO,
            calls: Default::default(),
        }
    }

    pub fn err(error: LlmError) -> Self {
        Self {
            response: Err(error),
            delay: Duration::ZERO,
            calls: Default::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl AnswerGenerator for MockGenerator {
    async fn generate(&self, _text: &str, timeout: Duration) -> Result<Answer, LlmError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(LlmError::Timeout);
        }
        tokio::time::sleep(self.delay).await;
        self.response.clone().map(|text| Answer {
            text,
            status: 200,
            elapsed: self.delay,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config(base_url: &str, api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            base_url: base_url.into(),
            api_key: api_key.map(|s| s.to_string()),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn from_config_builds_without_panic() {
        let _gen = ApiGenerator::from_config(&make_config("http://localhost:11434", None), 120);
        let _gen = ApiGenerator::from_config(&make_config("http://x", Some("")), 120);
        let _gen = ApiGenerator::from_config(&make_config("http://x", Some("sk-test")), 120);
    }

    #[test]
    fn generator_is_object_safe() {
        let gen: Box<dyn AnswerGenerator> =
            Box::new(ApiGenerator::from_config(&make_config("http://x", None), 120));
        drop(gen);
    }

    #[test]
    fn extract_reply_flattens_lines() {
        let json = serde_json::json!({
            "choices": [{ "message": { "content": "  Hello!\nI can hear you.  " } }]
        });
        assert_eq!(extract_reply(&json).unwrap(), "Hello! I can hear you.");
    }

    #[test]
    fn extract_reply_missing_or_blank_is_empty_response() {
        let missing = serde_json::json!({ "choices": [] });
        assert!(matches!(extract_reply(&missing), Err(LlmError::EmptyResponse)));

        let blank = serde_json::json!({
            "choices": [{ "message": { "content": " \n " } }]
        });
        assert!(matches!(extract_reply(&blank), Err(LlmError::EmptyResponse)));
    }

    #[tokio::test]
    async fn empty_base_url_is_config_missing() {
        let gen = ApiGenerator::from_config(&make_config("", None), 120);
        let err = gen
            .generate("hi", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ConfigMissing(_)));
    }

    #[tokio::test]
    async fn mock_generator_returns_answer() {
        let gen = MockGenerator::ok("Yes, loud and clear.");
        let a = gen.generate("hear me?", Duration::from_secs(1)).await.unwrap();
        assert_eq!(a.text, "Yes, loud and clear.");
        assert_eq!(gen.calls(), 1);
    }
}
