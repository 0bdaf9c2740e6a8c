//! Conversation phases and the overlay snapshot derived from them.
//!
//! [`Phase`] is a sum type: each variant carries only the data its phase
//! needs, so there is no stale "answer text" lying around while listening.

use std::time::{Duration, Instant};

use crate::llm::{Answer, LlmError};
use crate::slot::{BackgroundSlot, SlotPoll};
use crate::stt::{SttError, Transcript};

// ---------------------------------------------------------------------------
// PhaseKind
// ---------------------------------------------------------------------------

/// Discriminant of [`Phase`], for callers that only need the name.
///
/// ```text
/// Idle ──tap──▶ Listening ──tap / timeout──▶ Thinking ──answer + dwell──▶ Speaking
/// Listening ──tap inside cancel window──▶ Idle
/// Speaking ──done──▶ PostSpeakBlank ──dwell──▶ Cooldown ──elapsed──▶ Idle
/// Speaking ──hard timeout──▶ Cooldown
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhaseKind {
    #[default]
    Idle,
    Listening,
    Thinking,
    Speaking,
    PostSpeakBlank,
    Cooldown,
}

impl PhaseKind {
    pub fn label(&self) -> &'static str {
        match self {
            PhaseKind::Idle => "idle",
            PhaseKind::Listening => "listening",
            PhaseKind::Thinking => "thinking",
            PhaseKind::Speaking => "speaking",
            PhaseKind::PostSpeakBlank => "post_speak_blank",
            PhaseKind::Cooldown => "cooldown",
        }
    }

    /// `true` in every phase where a tap is swallowed without effect.
    pub fn ignores_taps(&self) -> bool {
        matches!(
            self,
            PhaseKind::Thinking | PhaseKind::Speaking | PhaseKind::PostSpeakBlank | PhaseKind::Cooldown
        )
    }
}

// ---------------------------------------------------------------------------
// Background calls
// ---------------------------------------------------------------------------

/// Result of checking a background call against its own timeout.
pub(crate) enum Polled<T> {
    Pending,
    Done(T),
    TimedOut,
    Lost,
}

/// A dispatched external call and the budget it was given.
pub(crate) struct Worker<T> {
    slot: BackgroundSlot<T>,
    started: Instant,
    timeout: Duration,
}

impl<T> Worker<T> {
    pub(crate) fn new(slot: BackgroundSlot<T>, started: Instant, timeout: Duration) -> Self {
        Self {
            slot,
            started,
            timeout,
        }
    }

    /// Never blocks. Past the timeout a still-running worker is given up on;
    /// dropping the worker aborts it.
    pub(crate) fn poll(&mut self, now: Instant) -> Polled<T> {
        match self.slot.try_take() {
            SlotPoll::Ready(v) => Polled::Done(v),
            SlotPoll::Lost => Polled::Lost,
            SlotPoll::Pending if now.saturating_duration_since(self.started) >= self.timeout => {
                Polled::TimedOut
            }
            SlotPoll::Pending => Polled::Pending,
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }
}

pub(crate) enum ThinkStep {
    Transcribing(Worker<Result<Transcript, SttError>>),
    Generating(Worker<Result<Answer, LlmError>>),
    Ready,
}

/// Data owned by the Thinking phase.
pub(crate) struct Thinking {
    pub since: Instant,
    /// Start of the shared transcription + generation budget.
    pub overall_start: Instant,
    pub step: ThinkStep,
    pub stt_ok: bool,
    pub llm_ok: bool,
    /// Recognised text, or the fallback line when recognition failed.
    pub transcript: String,
    pub answer: String,
    /// Overlay head: answer on success, sanitised error otherwise.
    pub llm_head: String,
}

impl Thinking {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            since: now,
            overall_start: now,
            step: ThinkStep::Ready,
            stt_ok: false,
            llm_ok: false,
            transcript: String::new(),
            answer: String::new(),
            llm_head: String::new(),
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        matches!(self.step, ThinkStep::Ready)
    }
}

pub(crate) struct Speaking {
    pub since: Instant,
    /// Conversation ref of the queued request; `None` when speaking is
    /// simulated because no playback engine is attached.
    pub awaiting: Option<u32>,
    pub hard_timeout: Duration,
}

pub(crate) enum Phase {
    Idle,
    Listening { since: Instant },
    Thinking(Thinking),
    Speaking(Speaking),
    PostSpeakBlank { since: Instant },
    Cooldown { since: Instant, duration: Duration },
}

impl Phase {
    pub(crate) fn kind(&self) -> PhaseKind {
        match self {
            Phase::Idle => PhaseKind::Idle,
            Phase::Listening { .. } => PhaseKind::Listening,
            Phase::Thinking(_) => PhaseKind::Thinking,
            Phase::Speaking(_) => PhaseKind::Speaking,
            Phase::PostSpeakBlank { .. } => PhaseKind::PostSpeakBlank,
            Phase::Cooldown { .. } => PhaseKind::Cooldown,
        }
    }
}

// ---------------------------------------------------------------------------
// Overlay
// ---------------------------------------------------------------------------

pub const HINT_IDLE: &str = "AI";
pub const HINT_CANCEL: &str = "tap: cancel";
pub const HINT_SEND: &str = "tap: send";
pub const HINT_WAIT: &str = "wait";

/// Status lines for the presentation layer. A plain snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Overlay {
    pub active: bool,
    pub phase: PhaseKind,
    pub line1: String,
    pub line2: String,
    pub hint: String,
}

/// Whole seconds left, rounded up.
pub(crate) fn ceil_secs(remaining: Duration) -> u64 {
    (remaining.as_millis() as u64).div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_secs_rounds_up() {
        assert_eq!(ceil_secs(Duration::ZERO), 0);
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::from_millis(1_000)), 1);
        assert_eq!(ceil_secs(Duration::from_millis(9_001)), 10);
    }

    #[test]
    fn busy_phases_ignore_taps() {
        assert!(!PhaseKind::Idle.ignores_taps());
        assert!(!PhaseKind::Listening.ignores_taps());
        assert!(PhaseKind::Thinking.ignores_taps());
        assert!(PhaseKind::Cooldown.ignores_taps());
    }

    #[test]
    fn phase_kind_matches_variant() {
        let now = Instant::now();
        assert_eq!(Phase::Idle.kind(), PhaseKind::Idle);
        assert_eq!(Phase::Thinking(Thinking::new(now)).kind(), PhaseKind::Thinking);
        assert_eq!(
            Phase::Cooldown {
                since: now,
                duration: Duration::ZERO
            }
            .kind(),
            PhaseKind::Cooldown
        );
    }
}
