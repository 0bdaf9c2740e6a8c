//! Failure taxonomy of a conversation cycle.
//!
//! Every variant is recovered locally: the controller substitutes a fallback
//! utterance, extends the cooldown and keeps going. [`TalkError`] exists so
//! the cause can be logged and inspected (`ConversationController::last_error`).

use thiserror::Error;

use crate::audio::Role;
use crate::llm::LlmError;
use crate::stt::SttError;

/// Which external call ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transcription,
    AnswerGeneration,
    Playback,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Transcription => "transcription",
            Stage::AnswerGeneration => "answer generation",
            Stage::Playback => "playback",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TalkError {
    /// A service is not configured (missing endpoint or credential).
    #[error("configuration missing: {0}")]
    ConfigMissing(&'static str),

    #[error("connectivity unavailable: {0}")]
    ConnectivityUnavailable(String),

    #[error("{0} timed out")]
    Timeout(Stage),

    /// Capture produced (almost) no audio.
    #[error("capture too quiet")]
    CaptureTooQuiet,

    #[error("failed to parse service response: {0}")]
    ParseFailure(String),

    /// The audio bus could not be acquired for the given role.
    #[error("audio bus busy (wanted {0})")]
    ResourceBusy(Role),

    /// Completion ids repeatedly failed to match the in-flight request.
    #[error("playback engine desync")]
    Desync,

    /// The orchestrator watchdog fired.
    #[error("speech request stuck")]
    StuckRequest,
}

impl From<SttError> for TalkError {
    fn from(e: SttError) -> Self {
        match e {
            SttError::ConfigMissing(what) => TalkError::ConfigMissing(what),
            SttError::Timeout => TalkError::Timeout(Stage::Transcription),
            SttError::Request(msg) => TalkError::ConnectivityUnavailable(msg),
            SttError::Status(code) => {
                TalkError::ConnectivityUnavailable(format!("transcription HTTP {code}"))
            }
            SttError::Parse(msg) => TalkError::ParseFailure(msg),
            SttError::Encode(msg) => TalkError::ParseFailure(msg),
        }
    }
}

impl From<LlmError> for TalkError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::ConfigMissing(what) => TalkError::ConfigMissing(what),
            LlmError::Timeout => TalkError::Timeout(Stage::AnswerGeneration),
            LlmError::Request(msg) => TalkError::ConnectivityUnavailable(msg),
            LlmError::Status(code) => {
                TalkError::ConnectivityUnavailable(format!("answer HTTP {code}"))
            }
            LlmError::Parse(msg) => TalkError::ParseFailure(msg),
            LlmError::EmptyResponse => TalkError::ParseFailure("empty response".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stt_timeout_maps_to_transcription_stage() {
        let e: TalkError = SttError::Timeout.into();
        assert_eq!(e, TalkError::Timeout(Stage::Transcription));
    }

    #[test]
    fn llm_errors_are_classified() {
        assert_eq!(
            TalkError::from(LlmError::Timeout),
            TalkError::Timeout(Stage::AnswerGeneration)
        );
        assert!(matches!(
            TalkError::from(LlmError::EmptyResponse),
            TalkError::ParseFailure(_)
        ));
        assert_eq!(
            TalkError::from(LlmError::ConfigMissing("llm.api_key")),
            TalkError::ConfigMissing("llm.api_key")
        );
    }

    #[test]
    fn display_mentions_stage() {
        assert!(TalkError::Timeout(Stage::Playback)
            .to_string()
            .contains("playback"));
    }
}
