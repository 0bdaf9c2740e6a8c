//! Cooperative runtime that ties the conversation controller to speech
//! playback.
//!
//! # Architecture
//!
//! [`TalkRuntime`] owns the [`ConversationController`], the
//! [`SpeechCoordinator`] and the shared [`SpeechOrchestrator`]. The caller
//! drives it with [`TalkRuntime::tick`] at 10 Hz or faster from a single
//! thread. One tick runs, in order:
//!
//! 1. `controller.tick(now)`
//! 2. orchestrator watchdog; on recovery the engine session is reset
//! 3. `coordinator.tick(now, controller)`
//!
//! The audio bus busy signal is published by the [`AudioArbiter`] itself on
//! every ownership change; [`TalkRuntime::busy_signal`] hands out receivers.
//!
//! [`SpeechOrchestrator`]: crate::speech::SpeechOrchestrator

use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::audio::{AudioArbiter, CaptureDevice};
use crate::config::AppConfig;
use crate::error::TalkError;
use crate::llm::AnswerGenerator;
use crate::speech::{
    lock, new_shared_orchestrator, Priority, SharedOrchestrator, SpeechCoordinator, SpeechKind,
};
use crate::stt::Transcriber;
use crate::talk::{ConversationController, Overlay};
use crate::tts::SpeechEngine;

/// Everything [`TalkRuntime::build`] wires together.
pub struct RuntimeParts {
    pub capture: Box<dyn CaptureDevice>,
    pub transcriber: Arc<dyn Transcriber>,
    pub generator: Arc<dyn AnswerGenerator>,
    /// `None` runs without playback; speaking is then simulated.
    pub engine: Option<Box<dyn SpeechEngine>>,
    pub arbiter: AudioArbiter,
    pub handle: Handle,
}

pub struct TalkRuntime {
    controller: ConversationController,
    coordinator: Option<SpeechCoordinator>,
    orchestrator: SharedOrchestrator,
    arbiter: AudioArbiter,
    last_recovery: Option<TalkError>,
}

impl TalkRuntime {
    pub fn build(config: &AppConfig, parts: RuntimeParts) -> Self {
        let orchestrator = new_shared_orchestrator(&config.speech);
        let mut controller = ConversationController::new(
            config.talk.clone(),
            parts.capture,
            parts.transcriber,
            parts.generator,
            parts.handle,
        );
        let coordinator = parts.engine.map(|engine| {
            SpeechCoordinator::new(orchestrator.clone(), engine)
        });
        if coordinator.is_some() {
            controller = controller.with_orchestrator(orchestrator.clone());
        } else {
            log::info!("app: no playback engine, speaking is simulated");
        }
        Self {
            controller,
            coordinator,
            orchestrator,
            arbiter: parts.arbiter,
            last_recovery: None,
        }
    }

    /// One cooperative step. Never blocks.
    pub fn tick(&mut self, now: Instant) {
        self.controller.tick(now);

        let Some(coordinator) = self.coordinator.as_mut() else {
            return;
        };
        let stuck = lock(&self.orchestrator).tick(now);
        if stuck {
            coordinator.on_watchdog_recovery();
            self.last_recovery = Some(TalkError::StuckRequest);
        }
        if let Some(recovery) = coordinator.tick(now, &mut self.controller) {
            self.last_recovery = Some(recovery);
        }
    }

    pub fn on_tap(&mut self, now: Instant) -> bool {
        self.controller.on_tap(now)
    }

    pub fn on_tap_at(&mut self, x: i32, y: i32, bounds_height: i32, now: Instant) -> bool {
        self.controller.on_tap_at(x, y, bounds_height, now)
    }

    pub fn inject_text(&mut self, text: &str) {
        self.controller.inject_text(text);
    }

    /// Speak `text` outside the conversation cycle. Returns `false` when
    /// there is no playback engine or the text is empty.
    pub fn say(&mut self, text: &str, priority: Priority) -> bool {
        let Some(coordinator) = self.coordinator.as_mut() else {
            return false;
        };
        let request = lock(&self.orchestrator).create_speech_request(
            0,
            text,
            priority,
            SpeechKind::BehaviorOriginated,
        );
        coordinator.speak_now(request)
    }

    pub fn consume_bubble_update(&mut self) -> Option<String> {
        self.controller.consume_bubble_update()
    }

    pub fn overlay(&self) -> Overlay {
        self.controller.overlay()
    }

    /// Text currently being played, empty when silent.
    pub fn speech_line(&self) -> &str {
        self.coordinator
            .as_ref()
            .map_or("", |c| c.speech_line())
    }

    /// Receiver that reads `true` while Capture or Playback holds the bus.
    pub fn busy_signal(&self) -> watch::Receiver<bool> {
        self.arbiter.subscribe_busy()
    }

    /// Most recent engine recovery (desync or stuck request).
    pub fn last_recovery(&self) -> Option<&TalkError> {
        self.last_recovery.as_ref()
    }

    pub fn controller(&self) -> &ConversationController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ConversationController {
        &mut self.controller
    }

    pub fn orchestrator(&self) -> &SharedOrchestrator {
        &self.orchestrator
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::Stage;
    use crate::llm::MockGenerator;
    use crate::speech::OrchestratorState;
    use crate::stt::MockTranscriber;
    use crate::talk::budget::hard_timeout;
    use crate::talk::controller::tests::{ms, settle, FakeCapture};
    use crate::talk::PhaseKind;
    use crate::tts::FakeEngine;

    struct Harness {
        _rt: tokio::runtime::Runtime,
        app: TalkRuntime,
        engine: FakeEngine,
        config: AppConfig,
    }

    fn harness_with(
        config: AppConfig,
        capture: FakeCapture,
        stt: MockTranscriber,
        llm: MockGenerator,
    ) -> Harness {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let engine = FakeEngine::new();
        let app = TalkRuntime::build(
            &config,
            RuntimeParts {
                capture: Box::new(capture),
                transcriber: Arc::new(stt),
                generator: Arc::new(llm),
                engine: Some(Box::new(engine.clone())),
                arbiter: AudioArbiter::new(),
                handle: rt.handle().clone(),
            },
        );
        Harness {
            _rt: rt,
            app,
            engine,
            config,
        }
    }

    fn harness(capture: FakeCapture, stt: MockTranscriber, llm: MockGenerator) -> Harness {
        harness_with(AppConfig::default(), capture, stt, llm)
    }

    impl Harness {
        fn phase(&self) -> PhaseKind {
            self.app.controller().phase()
        }

        /// Tap, tap again after the cancel window, wait for the workers and
        /// tick past the thinking dwell. Returns the time Speaking began.
        fn run_to_speaking(&mut self, t0: Instant) -> Instant {
            assert!(self.app.on_tap(t0));
            assert_eq!(self.phase(), PhaseKind::Listening);
            let stop = t0 + ms(4_000);
            assert!(self.app.on_tap(stop));
            assert_eq!(self.phase(), PhaseKind::Thinking);
            settle(self.app.controller_mut(), stop);
            let speak_at = stop + ms(300);
            self.app.tick(speak_at);
            assert_eq!(self.phase(), PhaseKind::Speaking);
            speak_at
        }
    }

    #[test]
    fn scenario_capture_failure_degrades_to_too_quiet() {
        let mut h = harness(
            FakeCapture::with_samples(0),
            MockTranscriber::ok("unused"),
            MockGenerator::ok("unused"),
        );
        let t0 = Instant::now();
        h.app.on_tap(t0);

        let listen_end = t0 + ms(h.config.talk.listen_timeout_ms);
        h.app.tick(listen_end);
        assert_eq!(h.phase(), PhaseKind::Thinking);
        assert_eq!(h.app.overlay().line1, "STT: ERR");

        let speak_at = listen_end + ms(200);
        h.app.tick(speak_at);
        assert_eq!(h.phase(), PhaseKind::Speaking);
        let (id, text) = h.engine.state().spoken.last().cloned().expect("dispatched");
        assert_eq!(text, h.config.talk.too_quiet_text);

        h.engine.start(id);
        h.app.tick(speak_at + ms(50));
        h.engine.finish(id, true);
        h.app.tick(speak_at + ms(1_000));
        assert_eq!(h.phase(), PhaseKind::PostSpeakBlank);

        let cool_at = speak_at + ms(1_500);
        h.app.tick(cool_at);
        assert_eq!(h.phase(), PhaseKind::Cooldown);

        let cooldown = h.config.talk.cooldown(true);
        h.app.tick(cool_at + cooldown - ms(1));
        assert_eq!(h.phase(), PhaseKind::Cooldown);
        h.app.tick(cool_at + cooldown);
        assert_eq!(h.phase(), PhaseKind::Idle);
        assert_eq!(
            h.app.controller().last_error(),
            Some(&TalkError::CaptureTooQuiet)
        );
    }

    #[test]
    fn scenario_happy_path() {
        let mut h = harness(
            FakeCapture::with_samples(32_000),
            MockTranscriber::ok("how are you"),
            MockGenerator::ok("Great, thanks!"),
        );
        let t0 = Instant::now();
        let speak_at = h.run_to_speaking(t0);

        let id = h.engine.last_spoken_id().expect("dispatched");
        assert_eq!(lock(h.app.orchestrator()).state(), OrchestratorState::Waiting);
        assert_eq!(
            h.app.consume_bubble_update().as_deref(),
            Some("Great, thanks!")
        );

        h.engine.start(id);
        h.app.tick(speak_at + ms(50));
        assert_eq!(lock(h.app.orchestrator()).state(), OrchestratorState::Active);
        assert_eq!(h.app.speech_line(), "Great, thanks!");

        h.engine.finish(id, true);
        let done_at = speak_at + ms(2_000);
        h.app.tick(done_at);
        assert_eq!(h.phase(), PhaseKind::PostSpeakBlank);
        assert_eq!(h.app.consume_bubble_update().as_deref(), Some(""));

        let cool_at = done_at + ms(h.config.talk.post_speak_blank_ms);
        h.app.tick(cool_at);
        assert_eq!(h.phase(), PhaseKind::Cooldown);
        h.app.tick(cool_at + h.config.talk.cooldown(false));
        assert_eq!(h.phase(), PhaseKind::Idle);
        assert_eq!(h.app.controller().last_error(), None);
        assert_eq!(h.app.last_recovery(), None);
    }

    #[test]
    fn scenario_stuck_playback_times_out_once() {
        let mut h = harness(
            FakeCapture::with_samples(32_000),
            MockTranscriber::ok("tell me a story"),
            MockGenerator::ok("Once upon a time."),
        );
        let t0 = Instant::now();
        let speak_at = h.run_to_speaking(t0);
        let id = h.engine.last_spoken_id().expect("dispatched");

        let limit = hard_timeout("Once upon a time.".len(), &h.config.talk);
        h.app.tick(speak_at + limit - ms(1));
        assert_eq!(h.phase(), PhaseKind::Speaking);

        let fired_at = speak_at + limit;
        h.app.tick(fired_at);
        assert_eq!(h.phase(), PhaseKind::Cooldown);
        assert_eq!(
            h.app.controller().last_error(),
            Some(&TalkError::Timeout(Stage::Playback))
        );
        assert_eq!(h.engine.state().canceled, vec![(id, "timeout".to_string())]);
        assert!(lock(h.app.orchestrator()).is_canceled(id));

        // Late completion for the canceled id changes nothing.
        h.engine.finish(id, false);
        h.app.tick(fired_at + ms(100));
        assert_eq!(h.phase(), PhaseKind::Cooldown);
        assert_eq!(h.engine.state().canceled.len(), 1);
        assert_eq!(h.engine.state().resets, 0);

        h.app.tick(fired_at + h.config.talk.cooldown(true));
        assert_eq!(h.phase(), PhaseKind::Idle);
    }

    #[test]
    fn cycle_returns_to_idle_within_deadline_bound() {
        let mut h = harness(
            FakeCapture::with_samples(32_000),
            MockTranscriber::ok("hello"),
            MockGenerator::ok("never").with_delay(Duration::from_secs(120)),
        );
        let talk = h.config.talk.clone();
        let bound = ms(talk.listen_timeout_ms
            + talk.overall_deadline_ms
            + talk.speak_timeout_max_ms
            + talk.post_speak_blank_ms
            + talk.cooldown_ms
            + talk.cooldown_error_extra_ms
            + 1_000);

        let t0 = Instant::now();
        h.app.on_tap(t0);
        let mut now = t0;
        while h.phase() != PhaseKind::Idle {
            now += ms(50);
            assert!(now - t0 <= bound, "still {:?} after {:?}", h.phase(), now - t0);
            if h.app.controller().has_pending_work() {
                std::thread::sleep(ms(1));
            }
            h.app.tick(now);
        }
        assert_eq!(
            h.app.controller().last_error(),
            Some(&TalkError::Timeout(Stage::AnswerGeneration))
        );
    }

    #[test]
    fn watchdog_resets_engine_when_playback_never_starts() {
        let mut config = AppConfig::default();
        config.speech.watchdog_ms = 1_000;
        let mut h = harness_with(
            config,
            FakeCapture::with_samples(32_000),
            MockTranscriber::ok("hi"),
            MockGenerator::ok("Hello."),
        );
        let t0 = Instant::now();
        let speak_at = h.run_to_speaking(t0);

        // First tick after dispatch stamps the watchdog start.
        h.app.tick(speak_at + ms(50));
        h.app.tick(speak_at + ms(1_100));
        assert_eq!(h.engine.state().resets, 1);
        assert_eq!(h.app.last_recovery(), Some(&TalkError::StuckRequest));
        assert_eq!(lock(h.app.orchestrator()).in_flight_id(), None);

        // The controller still degrades through its own hard timeout.
        let limit = hard_timeout("Hello.".len(), &h.config.talk);
        h.app.tick(speak_at + limit);
        assert_eq!(h.phase(), PhaseKind::Cooldown);
        assert!(h.engine.state().canceled.is_empty());
    }

    #[test]
    fn say_speaks_outside_the_conversation() {
        let mut h = harness(
            FakeCapture::with_samples(0),
            MockTranscriber::ok("x"),
            MockGenerator::ok("y"),
        );
        assert!(h.app.say("good morning", Priority::Normal));
        assert_eq!(
            h.engine.state().spoken.last().map(|(_, t)| t.clone()),
            Some("good morning".to_string())
        );
        assert!(!h.app.say("", Priority::Normal));
        assert_eq!(h.phase(), PhaseKind::Idle);
    }

    #[test]
    fn without_engine_speaking_is_simulated() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let config = AppConfig::default();
        let mut app = TalkRuntime::build(
            &config,
            RuntimeParts {
                capture: Box::new(FakeCapture::with_samples(0)),
                transcriber: Arc::new(MockTranscriber::ok("x")),
                generator: Arc::new(MockGenerator::ok("y")),
                engine: None,
                arbiter: AudioArbiter::new(),
                handle: rt.handle().clone(),
            },
        );
        let t0 = Instant::now();
        app.on_tap(t0);
        let listen_end = t0 + ms(config.talk.listen_timeout_ms);
        app.tick(listen_end);
        let speak_at = listen_end + ms(200);
        app.tick(speak_at);
        assert_eq!(app.controller().phase(), PhaseKind::Speaking);
        assert!(!app.say("hello", Priority::Low));

        app.tick(speak_at + ms(config.talk.simulated_speak_ms));
        assert_eq!(app.controller().phase(), PhaseKind::PostSpeakBlank);
    }
}
