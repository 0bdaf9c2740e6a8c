//! Speech request arbitration.
//!
//! # Architecture
//!
//! ```text
//! ConversationController ──create/enqueue──▶ SpeechOrchestrator ◀──correlate── SpeechCoordinator
//!          ▲                                   (queue, in-flight,                 │      ▲
//!          └──────── on_speak_done ─────────── cancel ledger, watchdog)           ▼      │
//!                                                                           SpeechEngine events
//! ```
//!
//! The orchestrator is pure bookkeeping; the coordinator is the per-tick glue
//! that moves requests into the engine and engine events back out.

pub mod coordinator;
pub mod orchestrator;
pub mod request;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::SpeechConfig;

pub use coordinator::{AbortNotice, ConversationHooks, SpeechCoordinator};
pub use orchestrator::{Completion, OrchestratorState, SpeechOrchestrator};
pub use request::{
    CancelLedger, CancelRecord, CancelSource, PendingQueue, Priority, PushOutcome, SpeechKind,
    SpeechRequest,
};

/// Orchestrator shared between the controller and the coordinator.
///
/// Both run on the tick thread; the mutex is held only for short
/// bookkeeping sections and never across a call into the other party.
pub type SharedOrchestrator = Arc<Mutex<SpeechOrchestrator>>;

pub fn new_shared_orchestrator(config: &SpeechConfig) -> SharedOrchestrator {
    Arc::new(Mutex::new(SpeechOrchestrator::new(config)))
}

/// Lock, recovering the data if a previous holder panicked.
pub fn lock(orchestrator: &SharedOrchestrator) -> MutexGuard<'_, SpeechOrchestrator> {
    orchestrator.lock().unwrap_or_else(PoisonError::into_inner)
}
