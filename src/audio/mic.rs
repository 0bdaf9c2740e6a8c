//! Microphone [`AudioSource`] via `cpal` (feature `device`).
//!
//! The cpal callback runs on the host audio thread. Each buffer is downmixed,
//! resampled to the recorder rate and pushed straight into the shared
//! [`PcmBuffer`](super::PcmBuffer); the stream lives for one capture session
//! and is dropped on `stop`.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::buffer::SharedPcmBuffer;
use super::capture::{AudioSource, CaptureError};
use super::convert::{downmix, resample};

pub struct MicSource {
    device: Option<cpal::Device>,
    config: Option<cpal::StreamConfig>,
    target_rate: u32,
    stream: Option<cpal::Stream>,
}

impl MicSource {
    pub fn new(target_rate: u32) -> Self {
        Self {
            device: None,
            config: None,
            target_rate,
            stream: None,
        }
    }
}

impl AudioSource for MicSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;
        let supported = device
            .default_input_config()
            .map_err(|e| CaptureError::Source(e.to_string()))?;
        log::info!(
            "mic: {} sr={} ch={}",
            device.name().unwrap_or_else(|_| "unknown".into()),
            supported.sample_rate().0,
            supported.channels()
        );
        self.config = Some(supported.into());
        self.device = Some(device);
        Ok(())
    }

    fn start(&mut self, sink: SharedPcmBuffer) -> Result<(), CaptureError> {
        let (Some(device), Some(config)) = (&self.device, &self.config) else {
            return Err(CaptureError::NoDevice);
        };
        let channels = config.channels;
        let source_rate = config.sample_rate.0;
        let target_rate = self.target_rate;

        let stream = device
            .build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = downmix(data, channels);
                    let pcm = resample(&mono, source_rate, target_rate);
                    if let Ok(mut buf) = sink.lock() {
                        buf.push_f32(&pcm);
                    }
                },
                |err: cpal::StreamError| {
                    log::error!("mic: cpal stream error: {err}");
                },
                None,
            )
            .map_err(|e| CaptureError::Source(e.to_string()))?;

        stream
            .play()
            .map_err(|e| CaptureError::Source(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        match self.stream.take() {
            Some(stream) => stream
                .pause()
                .map_err(|e| CaptureError::Source(e.to_string())),
            None => Ok(()),
        }
    }
}
