//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.
//! Every struct carries `#[serde(default)]`, so a partial `settings.toml`
//! only overrides the keys it names.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

/// Environment variable that fills any empty service `api_key`.
pub const API_KEY_ENV: &str = "TAP_TALK_API_KEY";

// ---------------------------------------------------------------------------
// TalkConfig
// ---------------------------------------------------------------------------

/// Timings and limits of the conversation state machine (all in ms / bytes).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TalkConfig {
    /// Listening auto-stops after this long.
    pub listen_timeout_ms: u64,
    /// A second tap within this window cancels the capture instead of
    /// submitting it.
    pub listen_cancel_window_ms: u64,
    /// A failed stop is still usable when at least this much audio exists.
    pub min_usable_capture_ms: u64,
    /// Default ceiling of the transcription call.
    pub stt_timeout_ms: u64,
    /// Default ceiling of the answer-generation call.
    pub llm_timeout_ms: u64,
    /// Total budget shared by transcription + answer generation.
    pub overall_deadline_ms: u64,
    /// Reserved at the end of the overall budget for bookkeeping.
    pub overall_margin_ms: u64,
    /// A call is skipped once its remaining budget drops below this.
    pub call_floor_ms: u64,
    /// Minimum time the thinking indicator stays visible.
    pub thinking_min_dwell_ms: u64,
    pub post_speak_blank_ms: u64,
    /// Speaking duration when no playback engine is attached.
    pub simulated_speak_ms: u64,
    pub cooldown_ms: u64,
    pub cooldown_error_extra_ms: u64,
    pub speak_timeout_base_ms: u64,
    pub speak_timeout_per_byte_ms: u64,
    pub speak_timeout_min_ms: u64,
    pub speak_timeout_max_ms: u64,
    /// Transcript / injected text clamp.
    pub max_input_bytes: usize,
    /// Answer clamp before it is handed to playback.
    pub max_answer_bytes: usize,
    /// Coordinate taps count only in the top `1 / tap_region_divisor` of the screen.
    pub tap_region_divisor: u32,
    /// Spoken when capture produced no usable audio.
    pub too_quiet_text: String,
    /// Spoken when transcription failed without an error text.
    pub temp_fail_text: String,
    /// Spoken when answer generation failed or was skipped.
    pub fallback_answer_text: String,
}

impl Default for TalkConfig {
    fn default() -> Self {
        Self {
            listen_timeout_ms: 10_000,
            listen_cancel_window_ms: 3_000,
            min_usable_capture_ms: 200,
            stt_timeout_ms: 8_000,
            llm_timeout_ms: 10_000,
            overall_deadline_ms: 20_000,
            overall_margin_ms: 250,
            call_floor_ms: 200,
            thinking_min_dwell_ms: 200,
            post_speak_blank_ms: 500,
            simulated_speak_ms: 2_000,
            cooldown_ms: 2_000,
            cooldown_error_extra_ms: 1_000,
            speak_timeout_base_ms: 20_000,
            speak_timeout_per_byte_ms: 90,
            speak_timeout_min_ms: 20_000,
            speak_timeout_max_ms: 60_000,
            max_input_bytes: 200,
            max_answer_bytes: 120,
            tap_region_divisor: 3,
            too_quiet_text: "I can't hear you. Come a little closer.".into(),
            temp_fail_text: "Something went wrong. Try again.".into(),
            fallback_answer_text: "I don't know.".into(),
        }
    }
}

impl TalkConfig {
    pub fn listen_timeout(&self) -> Duration {
        Duration::from_millis(self.listen_timeout_ms)
    }

    pub fn listen_cancel_window(&self) -> Duration {
        Duration::from_millis(self.listen_cancel_window_ms)
    }

    pub fn thinking_min_dwell(&self) -> Duration {
        Duration::from_millis(self.thinking_min_dwell_ms)
    }

    pub fn post_speak_blank(&self) -> Duration {
        Duration::from_millis(self.post_speak_blank_ms)
    }

    pub fn simulated_speak(&self) -> Duration {
        Duration::from_millis(self.simulated_speak_ms)
    }

    /// Cooldown length for a cycle, extended when any step failed.
    pub fn cooldown(&self, error: bool) -> Duration {
        let extra = if error { self.cooldown_error_extra_ms } else { 0 };
        Duration::from_millis(self.cooldown_ms + extra)
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for audio capture and the shared audio bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture sample rate in Hz handed to the transcription service.
    pub sample_rate: u32,
    /// Capture buffer length; recording ends naturally when it is full.
    pub max_record_secs: u32,
    /// Longest wait for the audio bus before a role acquisition is denied.
    pub bus_timeout_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            max_record_secs: 10,
            bus_timeout_ms: 2_000,
        }
    }
}

impl AudioConfig {
    pub fn bus_timeout(&self) -> Duration {
        Duration::from_millis(self.bus_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// SpeechConfig
// ---------------------------------------------------------------------------

/// Speech request arbitration limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub queue_capacity: usize,
    /// Requests longer than this are truncated before an id is allocated.
    pub max_text_bytes: usize,
    /// Consecutive mismatched completions before a desync is signalled.
    pub desync_threshold: u8,
    /// Ceiling on waiting for a dispatched request to start playing.
    pub watchdog_ms: u64,
    pub cancel_ledger_capacity: usize,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4,
            max_text_bytes: 128,
            desync_threshold: 3,
            watchdog_ms: 30_000,
            cancel_ledger_capacity: 8,
        }
    }
}

// ---------------------------------------------------------------------------
// SttConfig
// ---------------------------------------------------------------------------

/// Transcription service settings (OpenAI-compatible endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    pub base_url: String,
    /// `None` or empty for local servers that need no authentication.
    pub api_key: Option<String>,
    pub model: String,
    /// ISO-639-1 code, or `"auto"`.
    pub language: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".into(),
            api_key: None,
            model: "whisper-1".into(),
            language: "auto".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// LlmConfig
// ---------------------------------------------------------------------------

/// Answer-generation service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Model identifier sent to the API (e.g. `"gpt-4o-mini"`).
    pub model: String,
    /// Sampling temperature (0.0 – 1.0).
    pub temperature: f32,
    pub max_tokens: u32,
    /// Persona instructions prepended to every request.
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".into(),
            api_key: None,
            model: "gpt-4o-mini".into(),
            temperature: 0.7,
            max_tokens: 256,
            system_prompt: "You are a small desktop robot. Answer briefly and cheerfully \
                            in one or two sentences, no lists."
                .into(),
        }
    }
}

// ---------------------------------------------------------------------------
// TtsConfig
// ---------------------------------------------------------------------------

/// Speech-synthesis (playback engine) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// When `false` the controller runs without a playback engine and uses
    /// the simulated speaking duration.
    pub enabled: bool,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub voice: String,
    /// Ceiling on a single synthesis fetch.
    pub fetch_timeout_ms: u64,
    /// Sample rate of the raw PCM16 mono stream the service returns.
    pub pcm_sample_rate: u32,
    /// Byte rate assumed by the simulated sink (24 kHz PCM16 mono).
    pub playback_bytes_per_sec: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com".into(),
            api_key: None,
            model: "tts-1".into(),
            voice: "alloy".into(),
            fetch_timeout_ms: 15_000,
            pcm_sample_rate: 24_000,
            playback_bytes_per_sec: 48_000,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use tap_talk::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// assert!(config.talk.overall_deadline_ms > 0);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub talk: TalkConfig,
    pub audio: AudioConfig,
    pub speech: SpeechConfig,
    pub stt: SttConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet so
    /// callers never need to special-case a missing file.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&AppPaths::new().settings_file)?;
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            config.apply_api_key(&key);
        }
        Ok(config)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Fill every service `api_key` that is unset or empty with `key`.
    pub fn apply_api_key(&mut self, key: &str) {
        if key.is_empty() {
            return;
        }
        for slot in [
            &mut self.stt.api_key,
            &mut self.llm.api_key,
            &mut self.tts.api_key,
        ] {
            if slot.as_deref().map_or(true, str::is_empty) {
                *slot = Some(key.to_string());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = AppConfig::default();
        original.save_to(&path).expect("save");

        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(
            original.talk.overall_deadline_ms,
            loaded.talk.overall_deadline_ms
        );
        assert_eq!(original.talk.too_quiet_text, loaded.talk.too_quiet_text);
        assert_eq!(original.audio.sample_rate, loaded.audio.sample_rate);
        assert_eq!(original.speech.queue_capacity, loaded.speech.queue_capacity);
        assert_eq!(original.llm.model, loaded.llm.model);
        assert_eq!(original.tts.voice, loaded.tts.voice);
    }

    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        assert_eq!(config.talk.listen_timeout_ms, 10_000);
        assert_eq!(config.speech.desync_threshold, 3);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[talk]\ncooldown_ms = 500\n").expect("write");

        let config = AppConfig::load_from(&path).expect("load");
        assert_eq!(config.talk.cooldown_ms, 500);
        assert_eq!(config.talk.cooldown_error_extra_ms, 1_000);
        assert_eq!(config.speech.watchdog_ms, 30_000);
    }

    #[test]
    fn default_values_match_firmware_constants() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.talk.overall_deadline_ms, 20_000);
        assert_eq!(cfg.talk.overall_margin_ms, 250);
        assert_eq!(cfg.talk.stt_timeout_ms, 8_000);
        assert_eq!(cfg.talk.llm_timeout_ms, 10_000);
        assert_eq!(cfg.talk.call_floor_ms, 200);
        assert_eq!(cfg.talk.speak_timeout_max_ms, 60_000);
        assert_eq!(cfg.speech.queue_capacity, 4);
        assert_eq!(cfg.speech.max_text_bytes, 128);
        assert_eq!(cfg.audio.bus_timeout_ms, 2_000);
        assert_eq!(cfg.tts.pcm_sample_rate, 24_000);
    }

    #[test]
    fn cooldown_is_extended_on_error() {
        let talk = TalkConfig::default();
        assert_eq!(talk.cooldown(false), Duration::from_millis(2_000));
        assert_eq!(talk.cooldown(true), Duration::from_millis(3_000));
    }

    #[test]
    fn api_key_fills_only_empty_slots() {
        let mut cfg = AppConfig::default();
        cfg.llm.api_key = Some("sk-llm".into());
        cfg.tts.api_key = Some(String::new());

        cfg.apply_api_key("sk-env");

        assert_eq!(cfg.llm.api_key.as_deref(), Some("sk-llm"));
        assert_eq!(cfg.stt.api_key.as_deref(), Some("sk-env"));
        assert_eq!(cfg.tts.api_key.as_deref(), Some("sk-env"));
    }
}
