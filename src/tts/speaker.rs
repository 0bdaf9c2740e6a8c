//! Speaker [`AudioSink`] via `cpal` (feature `device`).
//!
//! Input is the synthesizer's raw PCM16 little-endian mono stream. It is
//! resampled to the device rate once, then fed frame by frame from the cpal
//! callback; every output channel gets the same sample.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio::resample;
use crate::tts::engine::TtsError;
use crate::tts::sink::AudioSink;

pub struct SpeakerSink {
    source_rate: u32,
}

impl SpeakerSink {
    pub fn new(source_rate: u32) -> Self {
        Self { source_rate }
    }
}

fn decode_pcm16le(audio: &[u8]) -> Vec<f32> {
    audio
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0)
        .collect()
}

impl AudioSink for SpeakerSink {
    fn play(&self, audio: &[u8], cancel: &AtomicBool) -> Result<(), TtsError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| TtsError::Device("no output device".into()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| TtsError::Device(e.to_string()))?;
        let channels = supported.channels().max(1) as usize;
        let device_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        let samples = Arc::new(resample(&decode_pcm16le(audio), self.source_rate, device_rate));
        let total = samples.len();
        let pos = Arc::new(AtomicUsize::new(0));

        let cb_samples = Arc::clone(&samples);
        let cb_pos = Arc::clone(&pos);
        let stream = device
            .build_output_stream(
                &config,
                move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in out.chunks_mut(channels) {
                        let i = cb_pos.fetch_add(1, Ordering::Relaxed);
                        let v = cb_samples.get(i).copied().unwrap_or(0.0);
                        frame.fill(v);
                    }
                },
                |err: cpal::StreamError| {
                    log::error!("speaker: cpal stream error: {err}");
                },
                None,
            )
            .map_err(|e| TtsError::Device(e.to_string()))?;
        stream
            .play()
            .map_err(|e| TtsError::Device(e.to_string()))?;

        while pos.load(Ordering::Relaxed) < total {
            if cancel.load(Ordering::SeqCst) {
                return Err(TtsError::Canceled);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_little_endian_pcm() {
        let bytes = [0x00, 0x40, 0x00, 0xC0, 0xFF];
        let out = decode_pcm16le(&bytes);
        // Odd trailing byte is ignored.
        assert_eq!(out, vec![0.5, -0.5]);
    }
}
