//! Playback engine contract.
//!
//! The speech layer talks to the engine only through [`SpeechEngine`]:
//! requests go in with `speak_async`, and two pull-style signals come out
//! (`take_playback_started` and `consume_done`), each delivered once.

use thiserror::Error;

// ---------------------------------------------------------------------------
// TtsError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum TtsError {
    #[error("speech synthesis not configured: {0}")]
    ConfigMissing(&'static str),

    #[error("speech synthesis timed out")]
    Timeout,

    #[error("synthesis request failed: {0}")]
    Request(String),

    #[error("synthesis HTTP {0}")]
    Status(u16),

    #[error("audio bus busy")]
    BusBusy,

    #[error("playback canceled")]
    Canceled,

    #[error("audio output failed: {0}")]
    Device(String),
}

impl From<reqwest::Error> for TtsError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TtsError::Timeout
        } else {
            TtsError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// SpeechDone
// ---------------------------------------------------------------------------

/// Completion of one engine request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechDone {
    pub request_id: u32,
    pub ok: bool,
    /// Short machine-readable reason (`"ok"`, `"timeout"`, `"canceled"`, ...).
    pub reason: String,
}

// ---------------------------------------------------------------------------
// SpeechEngine trait
// ---------------------------------------------------------------------------

pub trait SpeechEngine {
    /// Accept `text` for playback under `request_id`. `false` means the
    /// engine refused it (busy, empty text) and no events will follow.
    fn speak_async(&mut self, text: &str, request_id: u32) -> bool;
    /// Advance internal work; called once per tick.
    fn poll(&mut self);
    /// Best-effort cancel of `request_id`; unknown ids are ignored.
    fn cancel(&mut self, request_id: u32, reason: &str);
    fn consume_done(&mut self) -> Option<SpeechDone>;
    /// Id whose audio just started playing, once per request.
    fn take_playback_started(&mut self) -> Option<u32>;
    fn is_busy(&self) -> bool;
    /// Drop the current request and rebuild the synthesis transport.
    fn request_session_reset(&mut self);
}

// ---------------------------------------------------------------------------
// FakeEngine  (test-only)
// ---------------------------------------------------------------------------

/// Scriptable engine double; clones share state so a test can drive the
/// engine while the coordinator owns it.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: std::sync::Arc<std::sync::Mutex<FakeState>>,
}

#[cfg(test)]
#[derive(Default)]
pub struct FakeState {
    pub spoken: Vec<(u32, String)>,
    pub canceled: Vec<(u32, String)>,
    pub resets: usize,
    pub refuse: bool,
    pub busy_id: Option<u32>,
    started: std::collections::VecDeque<u32>,
    done: std::collections::VecDeque<SpeechDone>,
}

#[cfg(test)]
impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Simulate the audio of `id` starting.
    pub fn start(&self, id: u32) {
        self.state().started.push_back(id);
    }

    /// Simulate `id` finishing; frees the engine if it was the busy one.
    pub fn finish(&self, id: u32, ok: bool) {
        let mut s = self.state();
        if s.busy_id == Some(id) {
            s.busy_id = None;
        }
        s.done.push_back(SpeechDone {
            request_id: id,
            ok,
            reason: if ok { "ok".into() } else { "error".into() },
        });
    }

    pub fn last_spoken_id(&self) -> Option<u32> {
        self.state().spoken.last().map(|(id, _)| *id)
    }
}

#[cfg(test)]
impl SpeechEngine for FakeEngine {
    fn speak_async(&mut self, text: &str, request_id: u32) -> bool {
        let mut s = self.state();
        if s.refuse || s.busy_id.is_some() || text.is_empty() {
            return false;
        }
        s.spoken.push((request_id, text.to_string()));
        s.busy_id = Some(request_id);
        true
    }

    fn poll(&mut self) {}

    fn cancel(&mut self, request_id: u32, reason: &str) {
        let mut s = self.state();
        s.canceled.push((request_id, reason.to_string()));
        if s.busy_id == Some(request_id) {
            s.busy_id = None;
        }
    }

    fn consume_done(&mut self) -> Option<SpeechDone> {
        self.state().done.pop_front()
    }

    fn take_playback_started(&mut self) -> Option<u32> {
        self.state().started.pop_front()
    }

    fn is_busy(&self) -> bool {
        self.state.lock().unwrap().busy_id.is_some()
    }

    fn request_session_reset(&mut self) {
        let mut s = self.state();
        s.resets += 1;
        s.busy_id = None;
        s.started.clear();
        s.done.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_engine_refuses_while_busy() {
        let mut engine = FakeEngine::new();
        assert!(engine.speak_async("one", 1));
        assert!(engine.is_busy());
        assert!(!engine.speak_async("two", 2));

        engine.finish(1, true);
        assert!(!engine.is_busy());
        assert_eq!(
            engine.consume_done(),
            Some(SpeechDone {
                request_id: 1,
                ok: true,
                reason: "ok".into()
            })
        );
        assert_eq!(engine.consume_done(), None);
    }

    #[test]
    fn error_display() {
        assert!(TtsError::Status(429).to_string().contains("429"));
        assert_eq!(TtsError::Timeout.to_string(), "speech synthesis timed out");
    }
}
