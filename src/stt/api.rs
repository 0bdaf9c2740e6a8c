//! `ApiTranscriber`: any OpenAI-compatible `/v1/audio/transcriptions`
//! endpoint (OpenAI, Groq, a local whisper server, ...).

use std::time::Duration;

use async_trait::async_trait;

use crate::audio::encode_wav;
use crate::config::SttConfig;
use crate::stt::engine::{SttError, Transcriber, Transcript};

#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

pub struct ApiTranscriber {
    client: reqwest::Client,
    config: SttConfig,
}

impl ApiTranscriber {
    /// The per-call timeout is applied per request, so the client itself is
    /// built without one.
    pub fn from_config(config: &SttConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config: config.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/audio/transcriptions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Transcriber for ApiTranscriber {
    async fn transcribe(
        &self,
        pcm: &[i16],
        sample_rate: u32,
        timeout: Duration,
    ) -> Result<Transcript, SttError> {
        if self.config.base_url.trim().is_empty() {
            return Err(SttError::ConfigMissing("stt.base_url"));
        }

        let wav = encode_wav(pcm, sample_rate).map_err(|e| SttError::Encode(e.to_string()))?;
        log::debug!("stt: upload samples={} bytes={}", pcm.len(), wav.len());

        let file = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| SttError::Encode(e.to_string()))?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.config.model.clone());
        if self.config.language != "auto" && !self.config.language.is_empty() {
            form = form.text("language", self.config.language.clone());
        }

        let mut req = self
            .client
            .post(self.endpoint())
            .timeout(timeout)
            .multipart(form);

        // Local servers run without a key; only attach one when present.
        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            log::info!("stt: http status={}", status.as_u16());
            return Err(SttError::Status(status.as_u16()));
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| SttError::Parse(e.to_string()))?;

        Ok(Transcript {
            text: body.text.trim().to_string(),
            status: status.as_u16(),
        })
    }
}
