//! Speech request arbitration and completion correlation.
//!
//! ```text
//! Idle ──mark_in_flight──▶ Waiting ──on_playback_started(id)──▶ Active
//!   ▲                         │                                   │
//!   └──── on_completion(id) ──┴───────────────────────────────────┘
//!   ▲
//!   └──── cancel / watchdog / force_clear (from any state)
//! ```
//!
//! At most one request is in flight. Completions are matched by id; ids
//! that were canceled are absorbed through the [`CancelLedger`], and repeated
//! unknown ids escalate to a desync so the caller can reset the engine.

use std::time::{Duration, Instant};

use crate::config::SpeechConfig;
use crate::speech::request::{
    CancelLedger, CancelSource, PendingQueue, Priority, PushOutcome, SpeechKind, SpeechRequest,
};
use crate::text::clamp_utf8_bytes;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    /// Dispatched, audio not started yet.
    Waiting,
    /// Audio playing.
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    request_id: u32,
    conversation_ref: u32,
    kind: SpeechKind,
    mismatch_count: u8,
}

/// Result of [`SpeechOrchestrator::on_completion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub matched: bool,
    /// Correlated conversation cycle (0 when unmatched).
    pub conversation_ref: u32,
    pub kind: Option<SpeechKind>,
    /// Mismatches reached the threshold; the engine should be reset.
    pub desync: bool,
}

impl Completion {
    fn unmatched(desync: bool) -> Self {
        Self {
            matched: false,
            conversation_ref: 0,
            kind: None,
            desync,
        }
    }
}

// ---------------------------------------------------------------------------
// SpeechOrchestrator
// ---------------------------------------------------------------------------

pub struct SpeechOrchestrator {
    max_text_bytes: usize,
    desync_threshold: u8,
    watchdog: Duration,
    next_id: u32,
    pending: PendingQueue,
    in_flight: Option<InFlight>,
    canceled: CancelLedger,
    state: OrchestratorState,
    waiting_since: Option<Instant>,
}

impl SpeechOrchestrator {
    pub fn new(config: &SpeechConfig) -> Self {
        log::debug!(
            "orch: init queue={} max_text={} desync={} watchdog={}ms",
            config.queue_capacity,
            config.max_text_bytes,
            config.desync_threshold,
            config.watchdog_ms
        );
        Self {
            max_text_bytes: config.max_text_bytes,
            desync_threshold: config.desync_threshold.max(1),
            watchdog: Duration::from_millis(config.watchdog_ms),
            next_id: 1,
            pending: PendingQueue::new(config.queue_capacity),
            in_flight: None,
            canceled: CancelLedger::new(config.cancel_ledger_capacity),
            state: OrchestratorState::Idle,
            waiting_since: None,
        }
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Build a request, truncating `text` before an id is allocated.
    /// Empty text yields an invalid request and consumes no id.
    pub fn create_speech_request(
        &mut self,
        conversation_ref: u32,
        text: &str,
        priority: Priority,
        kind: SpeechKind,
    ) -> SpeechRequest {
        if text.is_empty() {
            return SpeechRequest::invalid(conversation_ref, priority, kind);
        }

        let clamped = clamp_utf8_bytes(text, self.max_text_bytes);
        if clamped.len() < text.len() {
            log::info!(
                "orch: speak text truncated ref={conversation_ref} len={}->{}",
                text.len(),
                clamped.len()
            );
        }

        let request_id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == 0 {
            self.next_id = 1;
        }

        log::debug!(
            "orch: speak cmd ref={conversation_ref} id={request_id} prio={priority:?} kind={kind:?} len={}",
            clamped.len()
        );
        SpeechRequest {
            request_id,
            conversation_ref,
            text: clamped,
            priority,
            kind,
            valid: true,
        }
    }

    pub fn enqueue(&mut self, request: SpeechRequest) {
        if !request.valid {
            log::info!("orch: drop invalid request ref={}", request.conversation_ref);
            return;
        }
        let id = request.request_id;
        match self.pending.push(request) {
            PushOutcome::Appended => {
                log::debug!("orch: enqueue id={id} size={}", self.pending.len())
            }
            PushOutcome::Replaced(old) => {
                log::info!("orch: replace old_id={} new_id={id}", old.request_id)
            }
            PushOutcome::DroppedOldest(old) => log::info!(
                "orch: drop oldest id={} size={}",
                old.request_id,
                self.pending.len()
            ),
        }
    }

    pub fn pop_next(&mut self) -> Option<SpeechRequest> {
        let next = self.pending.pop()?;
        log::debug!(
            "orch: pop id={} kind={:?} remaining={}",
            next.request_id,
            next.kind,
            self.pending.len()
        );
        Some(next)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    // -----------------------------------------------------------------------
    // In-flight tracking
    // -----------------------------------------------------------------------

    /// Record `request_id` as the single in-flight request. A previous
    /// record is overwritten.
    pub fn mark_in_flight(&mut self, request_id: u32, conversation_ref: u32, kind: SpeechKind) {
        if let Some(old) = self.in_flight {
            log::warn!(
                "orch: in-flight overwritten old_id={} new_id={request_id}",
                old.request_id
            );
        }
        self.in_flight = Some(InFlight {
            request_id,
            conversation_ref,
            kind,
            mismatch_count: 0,
        });
        self.transition(OrchestratorState::Waiting, "mark_in_flight");
    }

    /// Returns `true` when `request_id` is the in-flight request.
    pub fn on_playback_started(&mut self, request_id: u32) -> bool {
        match self.in_flight {
            Some(f) if f.request_id == request_id => {
                self.transition(OrchestratorState::Active, "playback_started");
                true
            }
            _ => {
                log::debug!(
                    "orch: playback start ignored got={request_id} expect={}",
                    self.in_flight_id().unwrap_or(0)
                );
                false
            }
        }
    }

    pub fn on_completion(&mut self, request_id: u32) -> Completion {
        let Some(mut flight) = self.in_flight else {
            log::debug!("orch: completion got={request_id} with nothing in flight");
            return Completion::unmatched(false);
        };

        if flight.request_id == request_id {
            self.in_flight = None;
            self.transition(OrchestratorState::Idle, "completion");
            return Completion {
                matched: true,
                conversation_ref: flight.conversation_ref,
                kind: Some(flight.kind),
                desync: false,
            };
        }

        if let Some(rec) = self.canceled.find(request_id) {
            log::debug!(
                "orch: late completion for canceled id={request_id} source={} reason={}",
                rec.source,
                rec.reason
            );
            return Completion::unmatched(false);
        }

        flight.mismatch_count = flight.mismatch_count.saturating_add(1);
        self.in_flight = Some(flight);
        let desync = flight.mismatch_count >= self.desync_threshold;
        log::info!(
            "orch: completion mismatch got={request_id} expect={} count={}",
            flight.request_id,
            flight.mismatch_count
        );
        if desync {
            log::warn!("orch: desync expect={}", flight.request_id);
        }
        Completion::unmatched(desync)
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Idempotent: returns `false` when `request_id` was already canceled
    /// (or is 0) and nothing changed.
    pub fn cancel(&mut self, request_id: u32, reason: &str, source: CancelSource) -> bool {
        if request_id == 0 {
            return false;
        }
        if let Some(prev) = self.canceled.find(request_id) {
            log::debug!(
                "orch: cancel ignored id={request_id} source={source} reason={reason} \
                 orig_source={} orig_reason={}",
                prev.source,
                prev.reason
            );
            return false;
        }
        self.canceled.remember(request_id, source, reason);

        let removed = self.pending.remove_id(request_id);
        let cleared = self.in_flight.is_some_and(|f| f.request_id == request_id);
        if cleared {
            self.in_flight = None;
            self.transition(OrchestratorState::Idle, "cancel");
        }
        log::info!(
            "orch: cancel id={request_id} source={source} reason={reason} \
             cleared_in_flight={cleared} pending_removed={removed}"
        );
        true
    }

    /// Cancel whatever `conversation_ref` has queued or in flight. Returns
    /// the id only when a dispatched request was canceled, since only then
    /// does the engine need telling.
    pub fn cancel_by_conversation_ref(
        &mut self,
        conversation_ref: u32,
        reason: &str,
        source: CancelSource,
    ) -> Option<u32> {
        if conversation_ref == 0 {
            return None;
        }
        if let Some(f) = self.in_flight.filter(|f| f.conversation_ref == conversation_ref) {
            self.cancel(f.request_id, reason, source);
            return Some(f.request_id);
        }
        if let Some(id) = self.pending.find_by_conversation(conversation_ref) {
            self.cancel(id, reason, source);
        }
        None
    }

    /// Request id currently associated with `conversation_ref`, in flight
    /// or pending.
    pub fn request_for_conversation(&self, conversation_ref: u32) -> Option<u32> {
        if conversation_ref == 0 {
            return None;
        }
        self.in_flight
            .filter(|f| f.conversation_ref == conversation_ref)
            .map(|f| f.request_id)
            .or_else(|| self.pending.find_by_conversation(conversation_ref))
    }

    /// Drop pending and in-flight bookkeeping (desync recovery).
    pub fn force_clear(&mut self, reason: &str) {
        let cleared = self.pending.len();
        self.pending.clear();
        self.in_flight = None;
        self.transition(OrchestratorState::Idle, reason);
        log::warn!("orch: force clear reason={reason} pending_cleared={cleared}");
    }

    // -----------------------------------------------------------------------
    // Watchdog
    // -----------------------------------------------------------------------

    /// Returns `true` when the watchdog fired and bookkeeping was reset.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.state != OrchestratorState::Waiting {
            self.waiting_since = None;
            return false;
        }
        let since = *self.waiting_since.get_or_insert(now);
        if now.saturating_duration_since(since) < self.watchdog {
            return false;
        }
        log::warn!(
            "orch: watchdog fired waited={}ms id={}",
            now.saturating_duration_since(since).as_millis(),
            self.in_flight_id().unwrap_or(0)
        );
        self.force_clear("watchdog");
        true
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn in_flight_id(&self) -> Option<u32> {
        self.in_flight.map(|f| f.request_id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_canceled(&self, request_id: u32) -> bool {
        self.canceled.find(request_id).is_some()
    }

    fn transition(&mut self, to: OrchestratorState, reason: &str) {
        if self.state != to {
            log::debug!("orch: state {:?} -> {to:?} reason={reason}", self.state);
        }
        // The watchdog restarts on every dispatch; `tick` stamps the start.
        self.waiting_since = None;
        self.state = to;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::request::SpeechKind::{
        BehaviorOriginated as Behavior, ConversationOriginated as Conversation,
    };

    fn orch() -> SpeechOrchestrator {
        SpeechOrchestrator::new(&SpeechConfig::default())
    }

    fn dispatch(o: &mut SpeechOrchestrator, conv: u32, text: &str) -> u32 {
        let req = o.create_speech_request(conv, text, Priority::High, Conversation);
        o.mark_in_flight(req.request_id(), conv, Conversation);
        req.request_id()
    }

    // ---- create_speech_request ---

    #[test]
    fn empty_text_is_invalid_and_consumes_no_id() {
        let mut o = orch();
        let bad = o.create_speech_request(1, "", Priority::Low, Behavior);
        assert!(!bad.is_valid());
        assert_eq!(bad.request_id(), 0);
        let good = o.create_speech_request(1, "hi", Priority::Low, Behavior);
        assert_eq!(good.request_id(), 1);
    }

    #[test]
    fn long_text_is_truncated_at_byte_limit() {
        let mut o = orch();
        let long = "a".repeat(300);
        let req = o.create_speech_request(1, &long, Priority::Normal, Behavior);
        assert_eq!(req.text().len(), 128);
    }

    #[test]
    fn ids_are_monotonic_and_skip_zero() {
        let mut o = orch();
        o.next_id = u32::MAX;
        let a = o.create_speech_request(1, "a", Priority::Normal, Behavior);
        let b = o.create_speech_request(1, "b", Priority::Normal, Behavior);
        assert_eq!(a.request_id(), u32::MAX);
        assert_eq!(b.request_id(), 1);
    }

    // ---- queue ---

    #[test]
    fn two_same_kind_requests_leave_only_the_second() {
        let mut o = orch();
        let first = o.create_speech_request(1, "first", Priority::Normal, Behavior);
        let second = o.create_speech_request(2, "second", Priority::Normal, Behavior);
        o.enqueue(first);
        o.enqueue(second.clone());
        assert_eq!(o.pending_len(), 1);
        assert_eq!(o.pop_next(), Some(second));
        assert_eq!(o.pop_next(), None);
    }

    #[test]
    fn invalid_request_is_not_enqueued() {
        let mut o = orch();
        let bad = o.create_speech_request(1, "", Priority::Normal, Behavior);
        o.enqueue(bad);
        assert!(!o.has_pending());
    }

    // ---- in-flight ---

    #[test]
    fn start_then_matching_completion() {
        let mut o = orch();
        let id = dispatch(&mut o, 42, "answer");
        assert_eq!(o.state(), OrchestratorState::Waiting);

        assert!(!o.on_playback_started(id + 1));
        assert_eq!(o.state(), OrchestratorState::Waiting);
        assert!(o.on_playback_started(id));
        assert_eq!(o.state(), OrchestratorState::Active);

        let c = o.on_completion(id);
        assert!(c.matched);
        assert_eq!(c.conversation_ref, 42);
        assert_eq!(c.kind, Some(Conversation));
        assert_eq!(o.state(), OrchestratorState::Idle);
        assert_eq!(o.in_flight_id(), None);
    }

    #[test]
    fn second_mark_in_flight_overwrites_single_slot() {
        let mut o = orch();
        o.mark_in_flight(5, 1, Behavior);
        o.mark_in_flight(6, 2, Conversation);
        assert_eq!(o.in_flight_id(), Some(6));

        // Only the newest record can complete.
        assert!(!o.on_completion(5).matched);
        let c = o.on_completion(6);
        assert!(c.matched);
        assert_eq!(c.conversation_ref, 2);
    }

    #[test]
    fn repeated_mismatch_signals_desync_at_threshold() {
        let mut o = orch();
        let id = dispatch(&mut o, 1, "x");
        assert!(!o.on_completion(id + 10).desync);
        assert!(!o.on_completion(id + 11).desync);
        let third = o.on_completion(id + 12);
        assert!(!third.matched);
        assert!(third.desync);
        assert_eq!(o.in_flight_id(), Some(id));

        o.force_clear("desync");
        assert_eq!(o.state(), OrchestratorState::Idle);
        assert_eq!(o.in_flight_id(), None);
    }

    #[test]
    fn completion_with_nothing_in_flight_never_desyncs() {
        let mut o = orch();
        for id in 1..10 {
            assert_eq!(o.on_completion(id), Completion::unmatched(false));
        }
    }

    // ---- cancel ---

    #[test]
    fn cancel_twice_is_idempotent() {
        let mut o = orch();
        let id = dispatch(&mut o, 1, "x");
        assert!(o.cancel(id, "timeout", CancelSource::Conversation));
        assert_eq!(o.state(), OrchestratorState::Idle);

        let queued = o.create_speech_request(2, "later", Priority::Normal, Behavior);
        o.enqueue(queued);
        assert!(!o.cancel(id, "again", CancelSource::Main));
        assert_eq!(o.pending_len(), 1);
        assert!(o.is_canceled(id));
    }

    #[test]
    fn late_completion_for_canceled_id_is_absorbed() {
        let mut o = orch();
        let old = dispatch(&mut o, 1, "old");
        o.cancel(old, "timeout", CancelSource::Conversation);
        let new = dispatch(&mut o, 2, "new");

        for _ in 0..5 {
            let c = o.on_completion(old);
            assert!(!c.matched);
            assert!(!c.desync);
        }
        assert_eq!(o.in_flight_id(), Some(new));
    }

    #[test]
    fn cancel_removes_pending_entry() {
        let mut o = orch();
        let req = o.create_speech_request(7, "queued", Priority::Normal, Behavior);
        let id = req.request_id();
        o.enqueue(req);
        assert!(o.cancel(id, "x", CancelSource::Other));
        assert!(!o.has_pending());
    }

    #[test]
    fn cancel_by_conversation_ref_returns_id_only_for_in_flight() {
        let mut o = orch();
        let id = dispatch(&mut o, 11, "speaking");
        assert_eq!(o.request_for_conversation(11), Some(id));
        assert_eq!(
            o.cancel_by_conversation_ref(11, "timeout", CancelSource::Conversation),
            Some(id)
        );
        assert_eq!(o.in_flight_id(), None);

        let queued = o.create_speech_request(12, "queued", Priority::High, Conversation);
        let queued_id = queued.request_id();
        o.enqueue(queued);
        assert_eq!(
            o.cancel_by_conversation_ref(12, "timeout", CancelSource::Conversation),
            None
        );
        assert!(!o.has_pending());
        assert!(o.is_canceled(queued_id));

        assert_eq!(o.cancel_by_conversation_ref(99, "none", CancelSource::Other), None);
    }

    // ---- watchdog ---

    #[test]
    fn watchdog_clears_stuck_waiting_state() {
        let mut o = orch();
        let t0 = Instant::now();
        dispatch(&mut o, 1, "x");
        let queued = o.create_speech_request(2, "y", Priority::Normal, Behavior);
        o.enqueue(queued);

        assert!(!o.tick(t0));
        assert!(!o.tick(t0 + Duration::from_millis(29_999)));
        assert!(o.tick(t0 + Duration::from_millis(30_000)));
        assert_eq!(o.state(), OrchestratorState::Idle);
        assert_eq!(o.in_flight_id(), None);
        assert!(!o.has_pending());
        assert!(!o.tick(t0 + Duration::from_millis(60_000)));
    }

    #[test]
    fn watchdog_ignores_active_playback() {
        let mut o = orch();
        let t0 = Instant::now();
        let id = dispatch(&mut o, 1, "x");
        o.tick(t0);
        o.on_playback_started(id);
        assert!(!o.tick(t0 + Duration::from_secs(120)));
        assert_eq!(o.state(), OrchestratorState::Active);
    }
}
