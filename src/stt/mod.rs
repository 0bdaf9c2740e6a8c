//! Transcription (speech-to-text) service client.
//!
//! ```text
//! Recorder::data() (PCM16 mono) ─encode_wav─▶ ApiTranscriber ─POST /v1/audio/transcriptions─▶ Transcript
//! ```
//!
//! The controller only sees the [`Transcriber`] trait; the concrete client is
//! injected at construction so tests can substitute a scripted double.

pub mod api;
pub mod engine;

pub use api::ApiTranscriber;
pub use engine::{SttError, Transcriber, Transcript};

#[cfg(test)]
pub use engine::MockTranscriber;
