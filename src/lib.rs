//! Tap-to-talk voice interaction core.
//!
//! A tap starts a capture on the shared audio bus; the recording is
//! transcribed, answered and spoken back within a fixed time budget, and the
//! state machine always finds its way back to idle.

pub mod app;
pub mod audio;
pub mod config;
pub mod error;
pub mod llm;
pub mod slot;
pub mod speech;
pub mod stt;
pub mod talk;
pub mod text;
pub mod tts;
