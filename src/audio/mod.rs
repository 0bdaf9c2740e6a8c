//! Audio bus arbitration and capture.
//!
//! # Flow
//!
//! ```text
//! AudioArbiter ◀──acquire(Capture)── Recorder ──start──▶ AudioSource
//!      ▲                                │                    │ (audio thread)
//!      └──acquire(Playback)── tts       └──◀── PcmBuffer ◀───┘
//! ```
//!
//! Exactly one role owns the bus at a time. The recorder holds the bus from
//! `start` until the session ends; the playback engine holds it for the
//! duration of each utterance.

pub mod arbiter;
pub mod buffer;
pub mod capture;
pub mod convert;
#[cfg(feature = "device")]
pub mod mic;

pub use arbiter::{AudioArbiter, AudioGuard, OwnerInfo, Role};
pub use buffer::{PcmBuffer, SharedPcmBuffer};
pub use capture::{AudioSource, CaptureDevice, CaptureError, NullSource, Recorder};
pub use convert::{downmix, encode_wav, resample, to_pcm16};
#[cfg(feature = "device")]
pub use mic::MicSource;
