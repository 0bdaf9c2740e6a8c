//! Speech request value types and the two bounded containers the
//! orchestrator keeps them in.

use std::collections::VecDeque;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// Who asked for the utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechKind {
    /// Idle chatter and reactions from the character behaviour layer.
    BehaviorOriginated,
    /// The answer of a conversation cycle.
    ConversationOriginated,
}

/// One playback request. Built only by
/// [`SpeechOrchestrator::create_speech_request`](super::SpeechOrchestrator::create_speech_request);
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    pub(crate) request_id: u32,
    pub(crate) conversation_ref: u32,
    pub(crate) text: String,
    pub(crate) priority: Priority,
    pub(crate) kind: SpeechKind,
    pub(crate) valid: bool,
}

impl SpeechRequest {
    pub(crate) fn invalid(conversation_ref: u32, priority: Priority, kind: SpeechKind) -> Self {
        Self {
            request_id: 0,
            conversation_ref,
            text: String::new(),
            priority,
            kind,
            valid: false,
        }
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn conversation_ref(&self) -> u32 {
        self.conversation_ref
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn kind(&self) -> SpeechKind {
        self.kind
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelSource {
    /// The conversation controller (hard timeout).
    Conversation,
    /// The runtime loop acting on an abort notice.
    Main,
    Other,
}

impl std::fmt::Display for CancelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CancelSource::Conversation => "conversation",
            CancelSource::Main => "main",
            CancelSource::Other => "other",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelRecord {
    pub request_id: u32,
    pub source: CancelSource,
    pub reason: String,
}

/// Ring of recently canceled ids; the oldest record falls out when full.
#[derive(Debug, Clone)]
pub struct CancelLedger {
    records: VecDeque<CancelRecord>,
    capacity: usize,
}

impl CancelLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn find(&self, request_id: u32) -> Option<&CancelRecord> {
        if request_id == 0 {
            return None;
        }
        self.records.iter().find(|r| r.request_id == request_id)
    }

    pub fn remember(&mut self, request_id: u32, source: CancelSource, reason: &str) {
        if request_id == 0 {
            return;
        }
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(CancelRecord {
            request_id,
            source,
            reason: reason.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

// ---------------------------------------------------------------------------
// PendingQueue
// ---------------------------------------------------------------------------

/// What happened on [`PendingQueue::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Appended,
    /// Tail had the same kind and was replaced.
    Replaced(SpeechRequest),
    /// Capacity exceeded; the oldest entry was dropped.
    DroppedOldest(SpeechRequest),
}

/// Bounded FIFO with latest-wins coalescing of same-kind tails.
#[derive(Debug, Clone)]
pub struct PendingQueue {
    items: VecDeque<SpeechRequest>,
    capacity: usize,
}

impl PendingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, request: SpeechRequest) -> PushOutcome {
        if let Some(tail) = self.items.back_mut() {
            if tail.kind == request.kind {
                return PushOutcome::Replaced(std::mem::replace(tail, request));
            }
        }
        self.items.push_back(request);
        if self.items.len() > self.capacity {
            if let Some(dropped) = self.items.pop_front() {
                return PushOutcome::DroppedOldest(dropped);
            }
        }
        PushOutcome::Appended
    }

    pub fn pop(&mut self) -> Option<SpeechRequest> {
        self.items.pop_front()
    }

    /// Remove every entry with `request_id`; returns how many were removed.
    pub fn remove_id(&mut self, request_id: u32) -> usize {
        let before = self.items.len();
        self.items.retain(|r| r.request_id != request_id);
        before - self.items.len()
    }

    pub fn find_by_conversation(&self, conversation_ref: u32) -> Option<u32> {
        self.items
            .iter()
            .find(|r| r.conversation_ref == conversation_ref)
            .map(|r| r.request_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpeechRequest> {
        self.items.iter()
    }
}
