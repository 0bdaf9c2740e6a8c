//! [`Transcriber`] trait, its result and error types.
//!
//! [`MockTranscriber`] (available under `#[cfg(test)]`) returns a scripted
//! response after an optional delay, which is enough to exercise the
//! controller's budget handling without a network.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

// ---------------------------------------------------------------------------
// SttError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum SttError {
    /// Endpoint or credential not configured.
    #[error("transcription not configured: {0}")]
    ConfigMissing(&'static str),

    #[error("transcription timed out")]
    Timeout,

    /// Transport-level failure (DNS, connect, reset).
    #[error("transcription request failed: {0}")]
    Request(String),

    /// Non-success HTTP status.
    #[error("transcription HTTP {0}")]
    Status(u16),

    #[error("failed to parse transcription response: {0}")]
    Parse(String),

    /// The captured audio could not be packaged for upload.
    #[error("failed to encode audio: {0}")]
    Encode(String),
}

impl From<reqwest::Error> for SttError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SttError::Timeout
        } else {
            SttError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    /// HTTP status of the service response (0 when not applicable).
    pub status: u16,
}

// ---------------------------------------------------------------------------
// Transcriber trait
// ---------------------------------------------------------------------------

/// Speech-to-text service.
///
/// `timeout` is the ceiling for this single call; the caller has already
/// reduced it to whatever is left of the cycle budget.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        pcm: &[i16],
        sample_rate: u32,
        timeout: Duration,
    ) -> Result<Transcript, SttError>;
}

// ---------------------------------------------------------------------------
// MockTranscriber  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub struct MockTranscriber {
    response: Result<String, SttError>,
    delay: Duration,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockTranscriber {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            response: Ok(text.into()),
            delay: Duration::ZERO,
            calls: Default::default(),
        }
    }

    pub fn err(error: SttError) -> Self {
        Self {
            response: Err(error),
            delay: Duration::ZERO,
            calls: Default::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(
        &self,
        _pcm: &[i16],
        _sample_rate: u32,
        timeout: Duration,
    ) -> Result<Transcript, SttError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(SttError::Timeout);
        }
        tokio::time::sleep(self.delay).await;
        self.response.clone().map(|text| Transcript { text, status: 200 })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_ok_returns_text() {
        let stt = MockTranscriber::ok("hello robot");
        let t = stt
            .transcribe(&[0; 160], 16_000, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(t.text, "hello robot");
        assert_eq!(stt.calls(), 1);
    }

    #[tokio::test]
    async fn mock_slower_than_timeout_times_out() {
        let stt = MockTranscriber::ok("late").with_delay(Duration::from_millis(200));
        let err = stt
            .transcribe(&[], 16_000, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, SttError::Timeout));
    }

    #[test]
    fn transcriber_is_object_safe() {
        let stt: Box<dyn Transcriber> = Box::new(MockTranscriber::ok("x"));
        drop(stt);
    }

    #[test]
    fn status_error_display() {
        assert!(SttError::Status(503).to_string().contains("503"));
    }
}
