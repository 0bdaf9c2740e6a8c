//! Audio output for synthesized speech.
//!
//! `play` is called on a blocking worker thread that already holds the audio
//! bus as Playback; it returns when the audio has finished or `cancel` was
//! raised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::tts::engine::TtsError;

pub trait AudioSink: Send + Sync {
    fn play(&self, audio: &[u8], cancel: &AtomicBool) -> Result<(), TtsError>;
}

const SLICE: Duration = Duration::from_millis(20);

/// Sink without an output device: "plays" for as long as the bytes would
/// take at `bytes_per_sec`.
#[derive(Debug, Clone)]
pub struct SimulatedSink {
    bytes_per_sec: u32,
}

impl SimulatedSink {
    pub fn new(bytes_per_sec: u32) -> Self {
        Self {
            bytes_per_sec: bytes_per_sec.max(1),
        }
    }

    pub fn duration_for(&self, bytes: usize) -> Duration {
        Duration::from_secs_f64(bytes as f64 / self.bytes_per_sec as f64)
    }
}

impl AudioSink for SimulatedSink {
    fn play(&self, audio: &[u8], cancel: &AtomicBool) -> Result<(), TtsError> {
        let end = Instant::now() + self.duration_for(audio.len());
        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(TtsError::Canceled);
            }
            let now = Instant::now();
            if now >= end {
                return Ok(());
            }
            std::thread::sleep(SLICE.min(end - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_follows_byte_rate() {
        let sink = SimulatedSink::new(48_000);
        assert_eq!(sink.duration_for(24_000), Duration::from_millis(500));
        assert_eq!(sink.duration_for(0), Duration::ZERO);
    }

    #[test]
    fn play_runs_for_duration() {
        let sink = SimulatedSink::new(1_000);
        let start = Instant::now();
        sink.play(&[0; 60], &AtomicBool::new(false)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn raised_cancel_stops_early() {
        let sink = SimulatedSink::new(1);
        let cancel = AtomicBool::new(true);
        let start = Instant::now();
        assert!(matches!(sink.play(&[0; 100], &cancel), Err(TtsError::Canceled)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
