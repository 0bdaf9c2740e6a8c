//! Answer-generation (LLM) service client.
//!
//! This module provides:
//! * [`AnswerGenerator`]: async trait the conversation controller calls.
//! * [`ApiGenerator`]: OpenAI-compatible `/v1/chat/completions` client.
//! * [`PromptBuilder`]: persona instructions + user turn as chat messages.
//! * [`LlmError`]: error variants for answer generation.

pub mod generator;
pub mod prompt;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use generator::{Answer, AnswerGenerator, ApiGenerator, LlmError};
pub use prompt::PromptBuilder;

#[cfg(test)]
pub use generator::MockGenerator;
