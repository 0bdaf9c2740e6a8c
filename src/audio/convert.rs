//! Sample format conversions between the capture source and the services.
//!
//! ```text
//! device f32 (any rate, N channels) ─downmix─▶ mono f32 ─resample─▶ mono f32 @ target
//!                                   ─to_pcm16─▶ i16 PcmBuffer ─encode_wav─▶ upload body
//! ```

use std::io::Cursor;

/// Average interleaved `channels` down to one channel.
///
/// `channels == 1` copies the input; `channels == 0` yields nothing.
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Linear-interpolation resampler from `source_rate` to `target_rate`.
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || source_rate == 0 {
        return samples.to_vec();
    }
    if samples.is_empty() {
        return Vec::new();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let src_pos = i as f64 / ratio;
            let idx = src_pos as usize;
            let frac = (src_pos - idx as f64) as f32;
            match (samples.get(idx), samples.get(idx + 1)) {
                (Some(a), Some(b)) => a * (1.0 - frac) + b * frac,
                (Some(a), None) => *a,
                _ => 0.0,
            }
        })
        .collect()
}

/// Convert `[-1.0, 1.0]` floats to PCM16, clipping out-of-range input.
pub fn to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

/// Wrap mono PCM16 in an in-memory WAV container for upload.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &s in samples {
            writer.write_sample(s)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_two_channels() {
        let out = downmix(&[1.0, -1.0, 0.5, 0.5], 2);
        assert_eq!(out.len(), 2);
        assert!(out[0].abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn downmix_zero_channels_is_empty() {
        assert!(downmix(&[1.0, 2.0], 0).is_empty());
    }

    #[test]
    fn resample_48k_to_16k_length() {
        let out = resample(&[0.5; 480], 48_000, 16_000);
        assert_eq!(out.len(), 160);
        assert!(out.iter().all(|s| (s - 0.5).abs() < 1e-5));
    }

    #[test]
    fn resample_same_rate_is_copy() {
        let input = [0.1_f32, 0.2, 0.3];
        assert_eq!(resample(&input, 16_000, 16_000), input.to_vec());
    }

    #[test]
    fn pcm16_clips_and_scales() {
        let out = to_pcm16(&[0.0, 1.0, -1.0, 2.0]);
        assert_eq!(out, vec![0, i16::MAX, -i16::MAX, i16::MAX]);
    }

    #[test]
    fn wav_has_riff_header_and_payload() {
        let bytes = encode_wav(&[0i16; 160], 16_000).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        // 44-byte canonical header + 2 bytes per sample.
        assert_eq!(bytes.len(), 44 + 320);
    }
}
