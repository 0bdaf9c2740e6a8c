//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for each subsystem,
//! `AppPaths` for the platform config directory, and TOML persistence via
//! `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::{AppPaths, CONFIG_DIR_ENV};
pub use settings::{
    AppConfig, AudioConfig, LlmConfig, SpeechConfig, SttConfig, TalkConfig, TtsConfig,
    API_KEY_ENV,
};
