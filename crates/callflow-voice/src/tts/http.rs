use super::{check_input_size, TtsAdapter};
use crate::audio::{rechunk, AudioStream};
use crate::config::HttpTtsConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Hosted synthesis over chunked HTTP.
///
/// The provider is expected to answer a JSON request with a streamed body of
/// raw audio in the configured format.
#[derive(Debug)]
pub struct HttpTts {
    config: HttpTtsConfig,
    client: RwLock<Option<reqwest::Client>>,
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<&'a str>,
    format: &'a str,
    sample_rate: u32,
}

impl HttpTts {
    pub fn new(config: HttpTtsConfig) -> Self {
        Self {
            config,
            client: RwLock::new(None),
        }
    }

    fn validate(&self) -> Result<(), VoiceError> {
        reqwest::Url::parse(&self.config.url)
            .map_err(|e| VoiceError::Config(format!("invalid TTS url {:?}: {}", self.config.url, e)))?;
        if self.config.chunk_bytes % 2 != 0 {
            return Err(VoiceError::Config(format!(
                "TTS chunk_bytes must be a whole number of 16-bit samples, got {}",
                self.config.chunk_bytes
            )));
        }
        if self.config.sample_rate == 0 {
            return Err(VoiceError::Config("TTS sample_rate must be positive".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TtsAdapter for HttpTts {
    async fn initialize(&self) -> Result<(), VoiceError> {
        self.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(self.config.connect_timeout_ms.max(1)))
            .build()?;
        *self.client.write().await = Some(client);
        info!(
            voice = self.config.voice.as_deref().unwrap_or("default"),
            sample_rate = self.config.sample_rate,
            "HTTP TTS ready"
        );
        Ok(())
    }

    async fn synthesize(&self, text: &str) -> Result<AudioStream, VoiceError> {
        check_input_size(text)?;
        let client = self
            .client
            .read()
            .await
            .clone()
            .ok_or_else(|| VoiceError::Tts("synthesizer is not initialized".to_string()))?;

        let body = SynthesisRequest {
            text,
            voice: self.config.voice.as_deref(),
            format: &self.config.format,
            sample_rate: self.config.sample_rate,
        };
        let mut request = client.post(&self.config.url).json(&body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!(
                "synthesis request failed with {}: {}",
                status,
                detail.trim()
            )));
        }

        debug!(chars = text.len(), "TTS stream opened");
        Ok(rechunk(response.bytes_stream(), self.config.chunk_bytes))
    }

    async fn close(&self) {
        self.client.write().await.take();
    }
}
