//! Text → audio bytes.
//!
//! [`ApiSynthesizer`] targets an OpenAI-compatible `/v1/audio/speech`
//! endpoint and asks for raw `pcm` (24 kHz, 16-bit, mono) so the bytes can
//! go straight to a sink without decoding.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::TtsConfig;
use crate::tts::engine::TtsError;

#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, timeout: Duration) -> Result<Vec<u8>, TtsError>;

    /// Drop cached connections; called on an engine session reset.
    fn reset(&self) {}
}

pub struct ApiSynthesizer {
    /// Rebuilt on `reset`, so pooled connections are discarded.
    client: Mutex<reqwest::Client>,
    config: TtsConfig,
}

impl ApiSynthesizer {
    pub fn from_config(config: &TtsConfig) -> Self {
        Self {
            client: Mutex::new(reqwest::Client::new()),
            config: config.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/audio/speech", self.config.base_url.trim_end_matches('/'))
    }

    fn client(&self) -> reqwest::Client {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Synthesizer for ApiSynthesizer {
    async fn synthesize(&self, text: &str, timeout: Duration) -> Result<Vec<u8>, TtsError> {
        #[derive(serde::Serialize)]
        struct SpeechRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            response_format: &'a str,
        }

        if self.config.base_url.trim().is_empty() {
            return Err(TtsError::ConfigMissing("tts.base_url"));
        }

        let request = SpeechRequest {
            model: &self.config.model,
            input: text,
            voice: &self.config.voice,
            response_format: "pcm",
        };

        let mut req = self
            .client()
            .post(self.endpoint())
            .timeout(timeout)
            .json(&request);
        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            log::info!("tts: http status={}", status.as_u16());
            return Err(TtsError::Status(status.as_u16()));
        }

        let audio = response.bytes().await?;
        log::debug!("tts: fetched bytes={}", audio.len());
        Ok(audio.to_vec())
    }

    fn reset(&self) {
        *self.client.lock().unwrap_or_else(PoisonError::into_inner) = reqwest::Client::new();
        log::info!("tts: synthesizer transport reset");
    }
}
