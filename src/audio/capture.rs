//! Capture device contract and the bus-aware [`Recorder`].
//!
//! [`CaptureDevice`] is what the conversation controller drives. [`Recorder`]
//! implements it on top of any [`AudioSource`]: it takes the audio bus as
//! [`Role::Capture`] on `start`, lets the source fill a [`PcmBuffer`], and
//! gives the bus back on every way out of a session:
//!
//! ```text
//! start ──▶ recording ──stop()────────────▶ idle   (release "rec.stop")
//!                      ──cancel()──────────▶ idle   (release "rec.cancel")
//!                      ──poll(): buffer full▶ idle  (release "rec.autostop")
//! ```
//!
//! The explicit `stop()` and the natural-end path can both run for the same
//! session; the second release finds no guard and is a no-op.

use std::time::Instant;

use thiserror::Error;

use super::arbiter::{AudioArbiter, AudioGuard, Role};
use super::buffer::{PcmBuffer, SharedPcmBuffer};

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device available")]
    NoDevice,

    #[error("audio source failed: {0}")]
    Source(String),
}

// ---------------------------------------------------------------------------
// CaptureDevice
// ---------------------------------------------------------------------------

/// Audio capture as seen by the conversation controller.
///
/// `start`/`stop` run at discrete transition edges on the controller's
/// context; nothing here may block longer than the bus timeout.
pub trait CaptureDevice {
    /// One-time initialisation; a `false` here makes later `start`s fail.
    fn begin(&mut self) -> bool;
    fn start(&mut self, now: Instant) -> bool;
    /// End the session keeping the captured audio. `false` means the source
    /// did not stop cleanly (the audio may still be usable).
    fn stop(&mut self, now: Instant) -> bool;
    /// End the session discarding the audio.
    fn cancel(&mut self);
    fn is_recording(&self) -> bool;
    /// Captured PCM16 mono samples of the last session.
    fn data(&self) -> &[i16];
    fn samples(&self) -> usize;
    fn sample_rate(&self) -> u32;
    /// Service background conditions such as a full buffer.
    fn poll(&mut self) {}
}

// ---------------------------------------------------------------------------
// AudioSource
// ---------------------------------------------------------------------------

/// Producer of mono PCM at the recorder's sample rate.
pub trait AudioSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }
    /// Begin delivering samples into `sink` (typically from another thread).
    fn start(&mut self, sink: SharedPcmBuffer) -> Result<(), CaptureError>;
    fn stop(&mut self) -> Result<(), CaptureError>;
}

/// Source that never produces audio (no microphone attached).
#[derive(Debug, Default)]
pub struct NullSource;

impl AudioSource for NullSource {
    fn start(&mut self, _sink: SharedPcmBuffer) -> Result<(), CaptureError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

pub struct Recorder<S: AudioSource> {
    arbiter: AudioArbiter,
    source: S,
    bus_timeout: std::time::Duration,
    sample_rate: u32,
    buffer: SharedPcmBuffer,
    guard: Option<AudioGuard>,
    captured: Vec<i16>,
    began: bool,
    recording: bool,
    last_stop_ok: bool,
    started_at: Option<Instant>,
}

impl<S: AudioSource> Recorder<S> {
    pub fn new(
        arbiter: AudioArbiter,
        source: S,
        sample_rate: u32,
        max_secs: u32,
        bus_timeout: std::time::Duration,
    ) -> Self {
        let capacity = sample_rate as usize * max_secs as usize;
        Self {
            arbiter,
            source,
            bus_timeout,
            sample_rate,
            buffer: PcmBuffer::shared(capacity),
            guard: None,
            captured: Vec::new(),
            began: false,
            recording: false,
            last_stop_ok: false,
            started_at: None,
        }
    }

    fn with_buffer<R>(&self, f: impl FnOnce(&mut PcmBuffer) -> R) -> R {
        let mut buf = self
            .buffer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut buf)
    }

    fn release_bus(&mut self, callsite: &'static str) {
        match self.guard.take() {
            Some(guard) => guard.release(callsite),
            None => log::debug!("rec: bus already released site={callsite}"),
        }
    }

    /// Stop the source and move the buffered audio into `captured`.
    fn finish_session(&mut self, callsite: &'static str) -> bool {
        let ok = match self.source.stop() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("rec: source stop failed at {callsite}: {e}");
                false
            }
        };
        self.recording = false;
        self.captured = self.with_buffer(PcmBuffer::take);
        self.release_bus(callsite);
        ok
    }

    /// `true` while this recorder holds the audio bus.
    pub fn holds_bus(&self) -> bool {
        self.guard.is_some()
    }
}

impl<S: AudioSource> CaptureDevice for Recorder<S> {
    fn begin(&mut self) -> bool {
        match self.source.open() {
            Ok(()) => self.began = true,
            Err(e) => log::warn!("rec: begin failed: {e}"),
        }
        self.began
    }

    fn start(&mut self, now: Instant) -> bool {
        if !self.began {
            log::warn!("rec: start refused, device not initialised");
            return false;
        }
        if self.recording {
            return false;
        }

        let Some(guard) = self
            .arbiter
            .acquire(Role::Capture, "rec.start", self.bus_timeout)
        else {
            log::info!("rec: start failed, audio bus busy");
            return false;
        };
        self.guard = Some(guard);

        self.captured.clear();
        self.with_buffer(PcmBuffer::clear);
        if let Err(e) = self.source.start(self.buffer.clone()) {
            log::warn!("rec: source start failed: {e}");
            self.release_bus("rec.start.fail");
            return false;
        }

        self.recording = true;
        self.last_stop_ok = false;
        self.started_at = Some(now);
        log::debug!("rec: started sr={}", self.sample_rate);
        true
    }

    fn stop(&mut self, now: Instant) -> bool {
        if !self.recording {
            // Natural end may already have closed the session.
            self.release_bus("rec.stop");
            return self.last_stop_ok;
        }
        self.last_stop_ok = self.finish_session("rec.stop");
        let took = self
            .started_at
            .map(|t| now.saturating_duration_since(t).as_millis())
            .unwrap_or(0);
        log::debug!(
            "rec: stop ok={} samples={} took={took}ms",
            self.last_stop_ok,
            self.captured.len()
        );
        self.last_stop_ok
    }

    fn cancel(&mut self) {
        if self.recording {
            if let Err(e) = self.source.stop() {
                log::warn!("rec: source stop failed on cancel: {e}");
            }
            self.recording = false;
        }
        self.with_buffer(PcmBuffer::clear);
        self.captured.clear();
        self.last_stop_ok = false;
        self.release_bus("rec.cancel");
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn data(&self) -> &[i16] {
        &self.captured
    }

    fn samples(&self) -> usize {
        if self.recording {
            self.with_buffer(|b| b.len())
        } else {
            self.captured.len()
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn poll(&mut self) {
        if self.recording && self.with_buffer(|b| b.is_full()) {
            self.last_stop_ok = self.finish_session("rec.autostop");
            log::info!("rec: buffer full, auto-stopped samples={}", self.captured.len());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    /// Source that writes a fixed block of samples on start.
    pub(crate) struct ScriptedSource {
        pub samples: Vec<i16>,
        pub fail_stop: bool,
    }

    impl ScriptedSource {
        pub(crate) fn with_samples(n: usize) -> Self {
            Self {
                samples: vec![1_000; n],
                fail_stop: false,
            }
        }
    }

    impl AudioSource for ScriptedSource {
        fn start(&mut self, sink: SharedPcmBuffer) -> Result<(), CaptureError> {
            sink.lock().unwrap().push(&self.samples);
            Ok(())
        }

        fn stop(&mut self) -> Result<(), CaptureError> {
            if self.fail_stop {
                Err(CaptureError::Source("stop timeout".into()))
            } else {
                Ok(())
            }
        }
    }

    fn recorder(arb: &AudioArbiter, samples: usize) -> Recorder<ScriptedSource> {
        let mut rec = Recorder::new(
            arb.clone(),
            ScriptedSource::with_samples(samples),
            16_000,
            1,
            Duration::from_millis(50),
        );
        assert!(rec.begin());
        rec
    }

    #[test]
    fn start_takes_capture_and_stop_releases() {
        let arb = AudioArbiter::new();
        let mut rec = recorder(&arb, 4_000);
        let now = Instant::now();

        assert!(rec.start(now));
        assert_eq!(arb.owner(), Some(Role::Capture));
        assert_eq!(rec.samples(), 4_000);

        assert!(rec.stop(now));
        assert_eq!(arb.owner(), None);
        assert_eq!(rec.data().len(), 4_000);
        assert!(!rec.is_recording());
    }

    #[test]
    fn start_without_begin_fails() {
        let arb = AudioArbiter::new();
        let mut rec = Recorder::new(
            arb.clone(),
            NullSource,
            16_000,
            1,
            Duration::from_millis(50),
        );
        assert!(!rec.start(Instant::now()));
        assert_eq!(arb.owner(), None);
    }

    #[test]
    fn start_fails_while_playback_holds_bus() {
        let arb = AudioArbiter::new();
        let _playing = arb
            .acquire(Role::Playback, "tts", Duration::from_millis(50))
            .unwrap();
        let mut rec = recorder(&arb, 100);

        // Same thread, different role: denied without waiting.
        assert!(!rec.start(Instant::now()));
        assert!(!rec.holds_bus());
        assert_eq!(arb.depth(), 1);
    }

    #[test]
    fn natural_end_then_stop_releases_once() {
        let arb = AudioArbiter::new();
        // Capacity is 16_000 samples; fill it completely.
        let mut rec = recorder(&arb, 16_000);
        let now = Instant::now();
        assert!(rec.start(now));

        rec.poll();
        assert!(!rec.is_recording());
        assert_eq!(arb.owner(), None);

        // Explicit stop after the natural end: safe no-op on the bus.
        assert!(rec.stop(now));
        assert_eq!(arb.depth(), 0);
        assert_eq!(rec.samples(), 16_000);

        // The bus is genuinely free for another role.
        assert!(arb
            .acquire(Role::Playback, "after", Duration::from_millis(50))
            .is_some());
    }

    #[test]
    fn cancel_discards_audio_and_releases() {
        let arb = AudioArbiter::new();
        let mut rec = recorder(&arb, 500);
        assert!(rec.start(Instant::now()));

        rec.cancel();
        assert_eq!(rec.samples(), 0);
        assert_eq!(arb.owner(), None);

        // Cancel again: nothing left to release.
        rec.cancel();
        assert_eq!(arb.depth(), 0);
    }

    #[test]
    fn failed_source_stop_still_releases_bus() {
        let arb = AudioArbiter::new();
        let mut rec = recorder(&arb, 800);
        rec.source.fail_stop = true;
        let now = Instant::now();
        assert!(rec.start(now));

        assert!(!rec.stop(now));
        assert_eq!(arb.owner(), None);
        assert_eq!(rec.samples(), 800);
    }
}
