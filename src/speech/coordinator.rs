//! Per-tick glue between the orchestrator, the playback engine and the
//! conversation layer.
//!
//! One [`SpeechCoordinator::tick`] performs, in order:
//!
//! 1. abort notices from the conversation → engine cancel + orchestrator cancel
//! 2. `engine.poll()`
//! 3. playback-start signals → `on_playback_started`
//! 4. completions → `on_completion`; a matched conversation request calls
//!    back `on_speak_done`, a desync resets the engine
//! 5. dispatch the next pending request when the engine is idle
//!
//! A desync recovery is reported back as [`TalkError::Desync`].

use std::time::Instant;

use crate::error::TalkError;
use crate::speech::orchestrator::Completion;
use crate::speech::request::{CancelSource, SpeechKind, SpeechRequest};
use crate::speech::{lock, SharedOrchestrator};
use crate::tts::SpeechEngine;

/// Request from the conversation layer to stop a dispatched utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortNotice {
    pub request_id: u32,
    pub reason: String,
}

/// The conversation side as seen by the coordinator.
pub trait ConversationHooks {
    /// Next pending abort notice, each delivered once.
    fn consume_abort_tts(&mut self) -> Option<AbortNotice>;
    fn on_speak_done(&mut self, conversation_ref: u32, now: Instant);
}

#[derive(Debug, Clone)]
struct Dispatched {
    request_id: u32,
    text: String,
}

pub struct SpeechCoordinator {
    orchestrator: SharedOrchestrator,
    engine: Box<dyn SpeechEngine>,
    dispatched: Option<Dispatched>,
    /// Text of the utterance currently audible, for the presentation layer.
    speech_line: String,
}

impl SpeechCoordinator {
    pub fn new(orchestrator: SharedOrchestrator, engine: Box<dyn SpeechEngine>) -> Self {
        Self {
            orchestrator,
            engine,
            dispatched: None,
            speech_line: String::new(),
        }
    }

    pub fn tick(&mut self, now: Instant, hooks: &mut dyn ConversationHooks) -> Option<TalkError> {
        self.handle_aborts(hooks);
        self.engine.poll();
        self.handle_playback_started();
        let recovery = self.handle_done(now, hooks);
        self.dispatch_next();
        recovery
    }

    /// Dispatch `request` right away when nothing is playing, else queue it.
    /// Returns `false` only for an invalid request.
    pub fn speak_now(&mut self, request: SpeechRequest) -> bool {
        if !request.is_valid() {
            return false;
        }
        let idle = !self.engine.is_busy() && lock(&self.orchestrator).in_flight_id().is_none();
        if idle {
            self.dispatch(request);
        } else {
            lock(&self.orchestrator).enqueue(request);
        }
        true
    }

    /// The orchestrator watchdog fired: drop engine and local state.
    pub fn on_watchdog_recovery(&mut self) {
        log::warn!("speech: watchdog recovery, resetting engine");
        self.engine.request_session_reset();
        self.clear_dispatched();
    }

    pub fn speech_line(&self) -> &str {
        &self.speech_line
    }

    pub fn engine_busy(&self) -> bool {
        self.engine.is_busy()
    }

    // -----------------------------------------------------------------------
    // Tick steps
    // -----------------------------------------------------------------------

    fn handle_aborts(&mut self, hooks: &mut dyn ConversationHooks) {
        while let Some(abort) = hooks.consume_abort_tts() {
            let reason = if abort.reason.is_empty() {
                "abort"
            } else {
                abort.reason.as_str()
            };
            log::info!("speech: abort id={} reason={reason}", abort.request_id);
            self.engine.cancel(abort.request_id, reason);
            if self
                .dispatched
                .as_ref()
                .is_some_and(|d| d.request_id == abort.request_id)
            {
                self.clear_dispatched();
            }
            lock(&self.orchestrator).cancel(abort.request_id, reason, CancelSource::Main);
        }
    }

    fn handle_playback_started(&mut self) {
        while let Some(id) = self.engine.take_playback_started() {
            let honored = lock(&self.orchestrator).on_playback_started(id);
            if !honored {
                continue;
            }
            if let Some(d) = self.dispatched.as_ref().filter(|d| d.request_id == id) {
                self.speech_line = d.text.clone();
            }
        }
    }

    fn handle_done(&mut self, now: Instant, hooks: &mut dyn ConversationHooks) -> Option<TalkError> {
        let mut recovery = None;
        while let Some(done) = self.engine.consume_done() {
            let completion: Completion = lock(&self.orchestrator).on_completion(done.request_id);
            log::debug!(
                "speech: done id={} ok={} reason={} matched={}",
                done.request_id,
                done.ok,
                done.reason,
                completion.matched
            );

            if self
                .dispatched
                .as_ref()
                .is_some_and(|d| d.request_id == done.request_id)
            {
                self.clear_dispatched();
            }

            if completion.matched
                && completion.kind == Some(SpeechKind::ConversationOriginated)
                && completion.conversation_ref != 0
            {
                hooks.on_speak_done(completion.conversation_ref, now);
            }

            if completion.desync {
                log::warn!("speech: desync, resetting engine");
                self.engine.request_session_reset();
                lock(&self.orchestrator).force_clear("desync");
                self.clear_dispatched();
                recovery = Some(TalkError::Desync);
            }
        }
        recovery
    }

    fn dispatch_next(&mut self) {
        if self.engine.is_busy() {
            return;
        }
        let next = {
            let mut orch = lock(&self.orchestrator);
            if orch.in_flight_id().is_some() {
                return;
            }
            orch.pop_next()
        };
        if let Some(request) = next {
            self.dispatch(request);
        }
    }

    fn dispatch(&mut self, request: SpeechRequest) {
        let id = request.request_id();
        if !self.engine.speak_async(request.text(), id) {
            log::info!("speech: engine refused id={id}, dropped");
            return;
        }
        lock(&self.orchestrator).mark_in_flight(id, request.conversation_ref(), request.kind());
        log::debug!("speech: dispatched id={id} ref={}", request.conversation_ref());
        self.dispatched = Some(Dispatched {
            request_id: id,
            text: request.text().to_string(),
        });
    }

    fn clear_dispatched(&mut self) {
        self.dispatched = None;
        self.speech_line.clear();
    }
}
