//! Conversation state machine.
//!
//! [`ConversationController`] turns a tap into one listen → transcribe →
//! answer → speak cycle. It runs on the cooperative tick thread and never
//! blocks: transcription and answer generation run on tokio workers whose
//! results are drained from [`BackgroundSlot`]s, and playback goes through the
//! shared [`SpeechOrchestrator`](crate::speech::SpeechOrchestrator).
//!
//! Every failure degrades to a fallback line plus a longer cooldown; the
//! controller always makes it back to Idle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;

use crate::audio::{CaptureDevice, Role};
use crate::config::TalkConfig;
use crate::error::{Stage, TalkError};
use crate::llm::AnswerGenerator;
use crate::slot::BackgroundSlot;
use crate::speech::{
    lock, AbortNotice, CancelSource, ConversationHooks, Priority, SharedOrchestrator, SpeechKind,
};
use crate::stt::Transcriber;
use crate::talk::budget::{call_timeout, hard_timeout};
use crate::talk::events::PresentationEvents;
use crate::talk::phase::{
    ceil_secs, Overlay, Phase, PhaseKind, Polled, Speaking, ThinkStep, Thinking, Worker,
    HINT_CANCEL, HINT_IDLE, HINT_SEND, HINT_WAIT,
};
use crate::text::{clamp_utf8_bytes, head, sanitize_one_line};

/// Bytes of answer / error text shown on the overlay.
const OVERLAY_HEAD_BYTES: usize = 40;

const TIMEOUT_REASON: &str = "timeout";

pub struct ConversationController {
    cfg: TalkConfig,
    phase: Phase,
    capture: Box<dyn CaptureDevice>,
    transcriber: Arc<dyn Transcriber>,
    generator: Arc<dyn AnswerGenerator>,
    orchestrator: Option<SharedOrchestrator>,
    runtime: Handle,
    events: PresentationEvents,
    overlay: Overlay,
    /// Text handed in with `inject_text` during Listening.
    injected: Option<String>,
    /// Any step of the current cycle failed.
    cycle_error: bool,
    last_error: Option<TalkError>,
    next_ref: u32,
}

impl ConversationController {
    pub fn new(
        cfg: TalkConfig,
        mut capture: Box<dyn CaptureDevice>,
        transcriber: Arc<dyn Transcriber>,
        generator: Arc<dyn AnswerGenerator>,
        runtime: Handle,
    ) -> Self {
        if !capture.begin() {
            log::warn!("talk: capture device unavailable, taps will stay idle");
        }
        Self {
            cfg,
            phase: Phase::Idle,
            capture,
            transcriber,
            generator,
            orchestrator: None,
            runtime,
            events: PresentationEvents::new(),
            overlay: Overlay::default(),
            injected: None,
            cycle_error: false,
            last_error: None,
            next_ref: 1,
        }
    }

    /// Route answers through `orchestrator`. Without one, speaking is
    /// simulated for a fixed duration.
    pub fn with_orchestrator(mut self, orchestrator: SharedOrchestrator) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Handle a tap. Always consumed (`true`).
    pub fn on_tap(&mut self, now: Instant) -> bool {
        let kind = self.phase.kind();
        if kind.ignores_taps() {
            log::debug!("talk: tap ignored state={}", kind.label());
            return true;
        }
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        self.phase = match phase {
            Phase::Idle => self.enter_listening(now),
            Phase::Listening { since } => {
                if now.saturating_duration_since(since) <= self.cfg.listen_cancel_window() {
                    self.enter_idle("tap_cancel")
                } else {
                    let usable = self.stop_capture(now);
                    self.enter_thinking(usable, now)
                }
            }
            other => other,
        };
        self.refresh_overlay(now);
        true
    }

    /// Tap with screen coordinates. Only taps in the top region are
    /// consumed; anything else returns `false` and leaves the state alone.
    pub fn on_tap_at(&mut self, _x: i32, y: i32, bounds_height: i32, now: Instant) -> bool {
        if bounds_height > 0 {
            let divisor = self.cfg.tap_region_divisor.max(1) as i32;
            if y >= bounds_height / divisor {
                return false;
            }
        }
        self.on_tap(now)
    }

    /// Use `text` as the transcript of the current capture (Listening only).
    pub fn inject_text(&mut self, text: &str) {
        if self.phase.kind() != PhaseKind::Listening || text.is_empty() {
            return;
        }
        let clamped = clamp_utf8_bytes(text, self.cfg.max_input_bytes);
        log::debug!("talk: inject len={}", clamped.len());
        self.injected = Some(clamped);
    }

    pub fn tick(&mut self, now: Instant) {
        self.capture.poll();
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        self.phase = match phase {
            Phase::Idle => Phase::Idle,
            Phase::Listening { since } => self.tick_listening(since, now),
            Phase::Thinking(thinking) => self.tick_thinking(thinking, now),
            Phase::Speaking(speaking) => self.tick_speaking(speaking, now),
            Phase::PostSpeakBlank { since } => {
                if now.saturating_duration_since(since) >= self.cfg.post_speak_blank() {
                    self.enter_cooldown("post_blank_done", now)
                } else {
                    Phase::PostSpeakBlank { since }
                }
            }
            Phase::Cooldown { since, duration } => {
                if now.saturating_duration_since(since) >= duration {
                    self.enter_idle("cooldown_done")
                } else {
                    Phase::Cooldown { since, duration }
                }
            }
        };
        self.refresh_overlay(now);
    }

    /// Playback of `conversation_ref` finished. Ignored unless Speaking and
    /// waiting on exactly that ref.
    pub fn on_speak_done(&mut self, conversation_ref: u32, now: Instant) {
        let awaiting = match &self.phase {
            Phase::Speaking(s) => s.awaiting,
            _ => None,
        };
        if awaiting != Some(conversation_ref) {
            log::debug!("talk: speak done ignored ref={conversation_ref} awaiting={awaiting:?}");
            return;
        }
        self.phase = self.enter_blank(now);
        self.refresh_overlay(now);
    }

    // -----------------------------------------------------------------------
    // Outputs
    // -----------------------------------------------------------------------

    /// New caption text, once per update. Empty means "clear".
    pub fn consume_bubble_update(&mut self) -> Option<String> {
        self.events.take_bubble()
    }

    pub fn consume_abort_tts(&mut self) -> Option<AbortNotice> {
        self.events.take_abort()
    }

    pub fn overlay(&self) -> Overlay {
        self.overlay.clone()
    }

    pub fn phase(&self) -> PhaseKind {
        self.phase.kind()
    }

    /// First failure of the current (or most recent) cycle.
    pub fn last_error(&self) -> Option<&TalkError> {
        self.last_error.as_ref()
    }

    /// `true` while a transcription or generation worker is outstanding.
    pub fn has_pending_work(&self) -> bool {
        matches!(
            &self.phase,
            Phase::Thinking(t) if !t.is_ready()
        )
    }

    /// Conversation ref the Speaking phase is waiting on.
    pub fn awaiting_ref(&self) -> Option<u32> {
        match &self.phase {
            Phase::Speaking(s) => s.awaiting,
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Listening
    // -----------------------------------------------------------------------

    fn enter_listening(&mut self, now: Instant) -> Phase {
        self.injected = None;
        self.cycle_error = false;
        self.last_error = None;

        if !self.capture.start(now) {
            log::info!("talk: listen start failed, staying idle");
            self.record_error(TalkError::ResourceBusy(Role::Capture));
            return Phase::Idle;
        }

        // Drop whatever caption was left from before.
        self.events.push_bubble("");
        log::info!("talk: state=listening");
        Phase::Listening { since: now }
    }

    fn tick_listening(&mut self, since: Instant, now: Instant) -> Phase {
        if now.saturating_duration_since(since) < self.cfg.listen_timeout() {
            return Phase::Listening { since };
        }
        log::debug!("talk: listen timeout");
        let usable = self.stop_capture(now);
        self.enter_thinking(usable, now)
    }

    /// Stop capture and decide whether the audio is worth transcribing.
    fn stop_capture(&mut self, now: Instant) -> bool {
        let mut ok = self.capture.stop(now);
        let samples = self.capture.samples();
        let min_samples =
            self.capture.sample_rate() as u64 * self.cfg.min_usable_capture_ms / 1000;
        if !ok && samples as u64 >= min_samples && samples > 0 {
            log::warn!("talk: capture stop failed but samples={samples}, continuing");
            ok = true;
        }
        ok && samples > 0
    }

    // -----------------------------------------------------------------------
    // Thinking
    // -----------------------------------------------------------------------

    /// Budget and first dispatch happen here, once, at the transition.
    fn enter_thinking(&mut self, capture_ok: bool, now: Instant) -> Phase {
        log::info!("talk: state=thinking");
        let mut thinking = Thinking::new(now);

        if let Some(text) = self.injected.take() {
            thinking.transcript = text;
            thinking.stt_ok = true;
            self.start_generation(&mut thinking, now);
            return Phase::Thinking(thinking);
        }

        if !capture_ok {
            log::warn!(
                "talk: transcription skipped, capture unusable samples={}",
                self.capture.samples()
            );
            self.record_error(TalkError::CaptureTooQuiet);
            self.settle_without_answer(&mut thinking, self.cfg.too_quiet_text.clone());
            return Phase::Thinking(thinking);
        }

        let ceiling = Duration::from_millis(self.cfg.stt_timeout_ms);
        let Some(timeout) = call_timeout(ceiling, Duration::ZERO, &self.cfg) else {
            self.fail_transcription(
                &mut thinking,
                "transcription timed out",
                TalkError::Timeout(Stage::Transcription),
            );
            return Phase::Thinking(thinking);
        };

        let pcm = self.capture.data().to_vec();
        let rate = self.capture.sample_rate();
        log::info!(
            "talk: transcription start samples={} sr={rate} timeout={}ms",
            pcm.len(),
            timeout.as_millis()
        );
        let transcriber = self.transcriber.clone();
        let slot = BackgroundSlot::spawn(&self.runtime, self.next_ref, async move {
            transcriber.transcribe(&pcm, rate, timeout).await
        });
        thinking.step = ThinkStep::Transcribing(Worker::new(slot, now, timeout));
        Phase::Thinking(thinking)
    }

    fn tick_thinking(&mut self, mut thinking: Thinking, now: Instant) -> Phase {
        self.advance_thinking(&mut thinking, now);

        let dwell_done =
            now.saturating_duration_since(thinking.since) >= self.cfg.thinking_min_dwell();
        if thinking.is_ready() && dwell_done {
            self.enter_speaking(thinking.answer, now)
        } else {
            Phase::Thinking(thinking)
        }
    }

    fn advance_thinking(&mut self, thinking: &mut Thinking, now: Instant) {
        match &mut thinking.step {
            ThinkStep::Ready => {}
            ThinkStep::Transcribing(worker) => {
                let timeout = worker.timeout();
                match worker.poll(now) {
                    Polled::Pending => {}
                    Polled::Done(Ok(transcript)) => {
                        let text = clamp_utf8_bytes(
                            &sanitize_one_line(&transcript.text),
                            self.cfg.max_input_bytes,
                        );
                        log::info!(
                            "talk: transcription done http={} text_len={}",
                            transcript.status,
                            text.len()
                        );
                        if text.is_empty() {
                            self.record_error(TalkError::CaptureTooQuiet);
                            self.settle_without_answer(thinking, self.cfg.too_quiet_text.clone());
                        } else {
                            thinking.transcript = text;
                            thinking.stt_ok = true;
                            self.start_generation(thinking, now);
                        }
                    }
                    Polled::Done(Err(e)) => {
                        log::warn!("talk: transcription failed: {e}");
                        let reason = e.to_string();
                        self.fail_transcription(thinking, &reason, e.into());
                    }
                    Polled::TimedOut => {
                        log::warn!("talk: transcription gave up after {}ms", timeout.as_millis());
                        self.fail_transcription(
                            thinking,
                            "transcription timed out",
                            TalkError::Timeout(Stage::Transcription),
                        );
                    }
                    Polled::Lost => {
                        log::warn!("talk: transcription worker lost");
                        self.fail_transcription(
                            thinking,
                            "transcription worker lost",
                            TalkError::ConnectivityUnavailable("transcription worker lost".into()),
                        );
                    }
                }
            }
            ThinkStep::Generating(worker) => {
                let timeout = worker.timeout();
                let (reason, error) = match worker.poll(now) {
                    Polled::Pending => return,
                    Polled::Done(Ok(answer)) => {
                        let text = clamp_utf8_bytes(&answer.text, self.cfg.max_answer_bytes);
                        log::info!(
                            "talk: answer done http={} took={}ms out_len={}",
                            answer.status,
                            answer.elapsed.as_millis(),
                            text.len()
                        );
                        thinking.llm_ok = true;
                        thinking.llm_head = head(&text, OVERLAY_HEAD_BYTES);
                        thinking.answer = text;
                        thinking.step = ThinkStep::Ready;
                        return;
                    }
                    Polled::Done(Err(e)) => {
                        log::warn!("talk: answer failed: {e}");
                        (e.to_string(), TalkError::from(e))
                    }
                    Polled::TimedOut => {
                        log::warn!("talk: answer gave up after {}ms", timeout.as_millis());
                        (
                            "answer timed out".to_string(),
                            TalkError::Timeout(Stage::AnswerGeneration),
                        )
                    }
                    Polled::Lost => {
                        log::warn!("talk: answer worker lost");
                        (
                            "answer worker lost".to_string(),
                            TalkError::ConnectivityUnavailable("answer worker lost".into()),
                        )
                    }
                };
                self.fail_generation(thinking, &reason, error);
            }
        }
    }

    /// Dispatch answer generation with whatever is left of the budget.
    fn start_generation(&mut self, thinking: &mut Thinking, now: Instant) {
        let elapsed = now.saturating_duration_since(thinking.overall_start);
        let ceiling = Duration::from_millis(self.cfg.llm_timeout_ms);
        let Some(timeout) = call_timeout(ceiling, elapsed, &self.cfg) else {
            log::warn!("talk: answer skipped, budget spent elapsed={}ms", elapsed.as_millis());
            self.fail_generation(
                thinking,
                "answer timed out",
                TalkError::Timeout(Stage::AnswerGeneration),
            );
            return;
        };

        log::info!("talk: answer start timeout={}ms", timeout.as_millis());
        let generator = self.generator.clone();
        let text = thinking.transcript.clone();
        let slot = BackgroundSlot::spawn(&self.runtime, self.next_ref, async move {
            generator.generate(&text, timeout).await
        });
        thinking.step = ThinkStep::Generating(Worker::new(slot, now, timeout));
    }

    fn fail_generation(&mut self, thinking: &mut Thinking, reason: &str, error: TalkError) {
        self.record_error(error);
        thinking.llm_ok = false;
        thinking.llm_head = head(&sanitize_one_line(reason), OVERLAY_HEAD_BYTES);
        thinking.answer = clamp_utf8_bytes(&self.cfg.fallback_answer_text, self.cfg.max_answer_bytes);
        thinking.step = ThinkStep::Ready;
    }

    /// The failure reason stands in for the transcript; the reply is the
    /// temporary-failure line and generation is skipped.
    fn fail_transcription(&mut self, thinking: &mut Thinking, reason: &str, error: TalkError) {
        self.record_error(error);
        let mut transcript = clamp_utf8_bytes(&sanitize_one_line(reason), self.cfg.max_input_bytes);
        if transcript.is_empty() {
            transcript = self.cfg.temp_fail_text.clone();
        }
        thinking.stt_ok = false;
        thinking.answer = clamp_utf8_bytes(&self.cfg.temp_fail_text, self.cfg.max_answer_bytes);
        thinking.transcript = transcript;
        thinking.step = ThinkStep::Ready;
    }

    /// Capture too quiet: the fallback line is both the transcript and the
    /// answer, and generation is skipped.
    fn settle_without_answer(&self, thinking: &mut Thinking, fallback: String) {
        thinking.stt_ok = false;
        thinking.answer = clamp_utf8_bytes(&fallback, self.cfg.max_answer_bytes);
        thinking.transcript = fallback;
        thinking.step = ThinkStep::Ready;
    }

    // -----------------------------------------------------------------------
    // Speaking and after
    // -----------------------------------------------------------------------

    fn enter_speaking(&mut self, answer: String, now: Instant) -> Phase {
        self.events.push_bubble(answer.clone());

        let conversation_ref = self.alloc_ref();
        let awaiting = self.orchestrator.as_ref().and_then(|orchestrator| {
            let mut orch = lock(orchestrator);
            let request = orch.create_speech_request(
                conversation_ref,
                &answer,
                Priority::High,
                SpeechKind::ConversationOriginated,
            );
            if !request.is_valid() {
                return None;
            }
            orch.enqueue(request);
            Some(conversation_ref)
        });

        let hard_timeout = match awaiting {
            Some(_) => hard_timeout(answer.len(), &self.cfg),
            None => self.cfg.simulated_speak(),
        };
        log::info!(
            "talk: state=speaking ref={conversation_ref} len={} limit={}ms queued={}",
            answer.len(),
            hard_timeout.as_millis(),
            awaiting.is_some()
        );
        Phase::Speaking(Speaking {
            since: now,
            awaiting,
            hard_timeout,
        })
    }

    fn tick_speaking(&mut self, speaking: Speaking, now: Instant) -> Phase {
        let elapsed = now.saturating_duration_since(speaking.since);
        if elapsed < speaking.hard_timeout {
            return Phase::Speaking(speaking);
        }
        let Some(conversation_ref) = speaking.awaiting else {
            // Simulated speaking ran its course.
            return self.enter_blank(now);
        };

        log::error!(
            "talk: playback hard timeout ref={conversation_ref} elapsed={}ms limit={}ms",
            elapsed.as_millis(),
            speaking.hard_timeout.as_millis()
        );
        let canceled = self.orchestrator.as_ref().and_then(|orchestrator| {
            lock(orchestrator).cancel_by_conversation_ref(
                conversation_ref,
                TIMEOUT_REASON,
                CancelSource::Conversation,
            )
        });
        // Only a dispatched request needs the engine told.
        if let Some(request_id) = canceled {
            self.events.push_abort(request_id, TIMEOUT_REASON);
        }
        self.record_error(TalkError::Timeout(Stage::Playback));
        self.enter_cooldown(TIMEOUT_REASON, now)
    }

    fn enter_blank(&mut self, now: Instant) -> Phase {
        self.events.push_bubble("");
        log::info!("talk: state=post_speak_blank");
        Phase::PostSpeakBlank { since: now }
    }

    fn enter_cooldown(&mut self, reason: &str, now: Instant) -> Phase {
        let duration = self.cfg.cooldown(self.cycle_error);
        log::info!(
            "talk: state=cooldown reason={reason} err={} dur={}ms",
            self.cycle_error,
            duration.as_millis()
        );
        Phase::Cooldown {
            since: now,
            duration,
        }
    }

    fn enter_idle(&mut self, reason: &str) -> Phase {
        if self.capture.is_recording() {
            self.capture.cancel();
        }
        self.injected = None;
        self.cycle_error = false;
        log::info!("talk: state=idle reason={reason}");
        Phase::Idle
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn record_error(&mut self, error: TalkError) {
        self.cycle_error = true;
        if self.last_error.is_none() {
            self.last_error = Some(error);
        }
    }

    fn alloc_ref(&mut self) -> u32 {
        let id = self.next_ref;
        self.next_ref = self.next_ref.wrapping_add(1).max(1);
        id
    }

    fn refresh_overlay(&mut self, now: Instant) {
        let remaining = |since: Instant, total: Duration| {
            ceil_secs(total.saturating_sub(now.saturating_duration_since(since)))
        };

        let (line1, line2, hint) = match &self.phase {
            Phase::Idle => {
                self.overlay = Overlay {
                    hint: HINT_IDLE.into(),
                    ..Overlay::default()
                };
                return;
            }
            Phase::Listening { since } => {
                let in_window =
                    now.saturating_duration_since(*since) <= self.cfg.listen_cancel_window();
                (
                    format!("LISTEN {}s", remaining(*since, self.cfg.listen_timeout())),
                    String::new(),
                    if in_window { HINT_CANCEL } else { HINT_SEND },
                )
            }
            Phase::Thinking(t) => {
                let (line1, line2) = match &t.step {
                    ThinkStep::Transcribing(_) => ("STT...".to_string(), String::new()),
                    ThinkStep::Generating(_) => ("LLM...".to_string(), String::new()),
                    ThinkStep::Ready if !t.stt_ok => {
                        ("STT: ERR".to_string(), overlay_head(&t.transcript))
                    }
                    ThinkStep::Ready => (
                        if t.llm_ok { "LLM: OK" } else { "LLM: ERR" }.to_string(),
                        overlay_head(&t.llm_head),
                    ),
                };
                (line1, line2, HINT_WAIT)
            }
            Phase::Speaking(_) => ("SPEAK".to_string(), String::new(), HINT_WAIT),
            Phase::PostSpeakBlank { since } => (
                format!("BLANK {}s", remaining(*since, self.cfg.post_speak_blank())),
                String::new(),
                HINT_WAIT,
            ),
            Phase::Cooldown { since, duration } => (
                format!("COOL {}s", remaining(*since, *duration)),
                String::new(),
                HINT_IDLE,
            ),
        };

        self.overlay = Overlay {
            active: true,
            phase: self.phase.kind(),
            line1,
            line2,
            hint: hint.to_string(),
        };
    }
}

fn overlay_head(text: &str) -> String {
    let h = head(text, OVERLAY_HEAD_BYTES);
    if h.is_empty() {
        "...".to_string()
    } else {
        h
    }
}

impl ConversationHooks for ConversationController {
    fn consume_abort_tts(&mut self) -> Option<AbortNotice> {
        ConversationController::consume_abort_tts(self)
    }

    fn on_speak_done(&mut self, conversation_ref: u32, now: Instant) {
        ConversationController::on_speak_done(self, conversation_ref, now)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
