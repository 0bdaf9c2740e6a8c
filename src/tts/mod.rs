//! Speech playback engine.
//!
//! * [`SpeechEngine`]: contract the speech coordinator drives.
//! * [`SynthEngine`]: synthesis fetch on tokio + playback on a blocking
//!   worker that holds the audio bus as Playback.
//! * [`Synthesizer`] / [`ApiSynthesizer`]: text → PCM bytes.
//! * [`AudioSink`] / [`SimulatedSink`]: where the bytes go.

pub mod engine;
pub mod player;
pub mod sink;
#[cfg(feature = "device")]
pub mod speaker;
pub mod synth;

pub use engine::{SpeechDone, SpeechEngine, TtsError};
pub use player::SynthEngine;
pub use sink::{AudioSink, SimulatedSink};
#[cfg(feature = "device")]
pub use speaker::SpeakerSink;
pub use synth::{ApiSynthesizer, Synthesizer};

#[cfg(test)]
pub use engine::FakeEngine;
