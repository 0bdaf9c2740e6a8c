//! Conversation cycle: tap → listen → transcribe → answer → speak.
//!
//! * [`ConversationController`]: the phase state machine.
//! * [`budget`]: shared deadline and playback hard-timeout arithmetic.
//! * [`PresentationEvents`]: exactly-once caption / abort notifications.
//! * [`Overlay`] / [`PhaseKind`]: status snapshot for the presentation layer.

pub mod budget;
pub mod controller;
pub mod events;
pub mod phase;

pub use controller::ConversationController;
pub use events::PresentationEvents;
pub use phase::{Overlay, PhaseKind};
