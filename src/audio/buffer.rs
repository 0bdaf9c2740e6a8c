//! Fixed-capacity PCM16 capture buffer.
//!
//! Unlike a ring buffer, [`PcmBuffer`] keeps the **head** of the recording:
//! once `capacity` samples are stored further input is discarded and the
//! buffer reports [`is_full`](PcmBuffer::is_full). The recorder treats a full
//! buffer as the natural end of a capture session.
//!
//! ```rust
//! use tap_talk::audio::PcmBuffer;
//!
//! let mut buf = PcmBuffer::new(4);
//! buf.push(&[1, 2, 3, 4, 5]);
//! assert!(buf.is_full());
//! assert_eq!(buf.as_slice(), &[1, 2, 3, 4]);
//! ```

use std::sync::{Arc, Mutex};

use super::convert::to_pcm16;

/// Buffer shared between the audio source thread and the recorder.
pub type SharedPcmBuffer = Arc<Mutex<PcmBuffer>>;

#[derive(Debug, Clone)]
pub struct PcmBuffer {
    samples: Vec<i16>,
    capacity: usize,
    /// Largest absolute sample seen since the last clear.
    peak: u16,
    /// Samples discarded because the buffer was full.
    dropped: usize,
}

impl PcmBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            peak: 0,
            dropped: 0,
        }
    }

    pub fn shared(capacity: usize) -> SharedPcmBuffer {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    /// Append as many samples as fit; returns how many were stored.
    pub fn push(&mut self, data: &[i16]) -> usize {
        let room = self.capacity - self.samples.len();
        let take = room.min(data.len());
        for &s in &data[..take] {
            self.peak = self.peak.max(s.unsigned_abs());
        }
        self.samples.extend_from_slice(&data[..take]);
        self.dropped += data.len() - take;
        take
    }

    /// Convert and append float samples.
    pub fn push_f32(&mut self, data: &[f32]) -> usize {
        self.push(&to_pcm16(data))
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.peak = 0;
        self.dropped = 0;
    }

    /// Take the stored samples, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<i16> {
        let out = std::mem::take(&mut self.samples);
        self.samples.reserve(self.capacity);
        self.peak = 0;
        self.dropped = 0;
        out
    }

    pub fn as_slice(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn peak(&self) -> u16 {
        self.peak
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_within_capacity() {
        let mut buf = PcmBuffer::new(8);
        assert_eq!(buf.push(&[1, -2, 3]), 3);
        assert_eq!(buf.len(), 3);
        assert!(!buf.is_full());
        assert_eq!(buf.peak(), 3);
    }

    #[test]
    fn overflow_keeps_head_and_counts_drops() {
        let mut buf = PcmBuffer::new(3);
        assert_eq!(buf.push(&[1, 2]), 2);
        assert_eq!(buf.push(&[3, 4, 5]), 1);
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
        assert_eq!(buf.dropped(), 2);
        assert!(buf.is_full());
    }

    #[test]
    fn take_empties_and_resets() {
        let mut buf = PcmBuffer::new(4);
        buf.push(&[i16::MIN, 7]);
        assert_eq!(buf.peak(), 32_768);

        let out = buf.take();
        assert_eq!(out, vec![i16::MIN, 7]);
        assert!(buf.is_empty());
        assert_eq!(buf.peak(), 0);

        buf.push(&[9]);
        assert_eq!(buf.as_slice(), &[9]);
    }

    #[test]
    fn push_f32_converts() {
        let mut buf = PcmBuffer::new(4);
        buf.push_f32(&[0.0, 1.0]);
        assert_eq!(buf.as_slice(), &[0, i16::MAX]);
    }
}
