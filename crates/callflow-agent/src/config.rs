//! Agent configuration loading from file and environment variables.

use callflow_voice::{
    ChatLlmConfig, HttpTtsConfig, PipelineConfig, PiperTtsConfig, StreamingSttConfig,
    WhisperSttConfig,
};
use serde::Deserialize;
use thiserror::Error;

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Orchestrator settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Caller audio framing.
    #[serde(default)]
    pub audio: AudioConfig,

    /// Speech-to-text backend.
    #[serde(default)]
    pub stt: SttConfig,

    /// Language model provider.
    #[serde(default)]
    pub llm: ChatLlmConfig,

    /// Text-to-speech backend.
    #[serde(default)]
    pub tts: TtsConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Format of the raw s16le mono audio read from stdin.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Duration of one frame handed to the pipeline.
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u64,

    /// Pace frames at wall-clock speed, as a telephony transport would.
    #[serde(default = "default_realtime")]
    pub realtime: bool,

    /// How long to keep listening after the input ends.
    #[serde(default = "default_drain_ms")]
    pub drain_ms: u64,
}

impl AudioConfig {
    /// Bytes in one frame of s16le mono audio.
    pub fn frame_bytes(&self) -> usize {
        (u64::from(self.sample_rate) * self.frame_ms / 1000) as usize * 2
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum SttConfig {
    Streaming(StreamingSttConfig),
    Whisper(WhisperSttConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum TtsConfig {
    Http(HttpTtsConfig),
    Piper(PiperTtsConfig),
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "callflow_voice=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_frame_ms() -> u64 {
    20
}

fn default_realtime() -> bool {
    true
}

fn default_drain_ms() -> u64 {
    2_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            frame_ms: default_frame_ms(),
            realtime: default_realtime(),
            drain_ms: default_drain_ms(),
        }
    }
}

impl Default for SttConfig {
    fn default() -> Self {
        Self::Streaming(StreamingSttConfig::default())
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self::Http(HttpTtsConfig::default())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CALLFLOW_LOG_LEVEL` overrides `logging.level`
/// - `CALLFLOW_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `CALLFLOW_STT_URL` / `CALLFLOW_STT_API_KEY` override the streaming STT endpoint and key
/// - `CALLFLOW_LLM_URL`, `CALLFLOW_LLM_API_KEY`, `CALLFLOW_LLM_MODEL` override `llm.*`
/// - `CALLFLOW_TTS_URL` / `CALLFLOW_TTS_API_KEY` override the HTTP TTS endpoint and key
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(level) = var("CALLFLOW_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("CALLFLOW_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    if let SttConfig::Streaming(stt) = &mut config.stt {
        if let Some(url) = var("CALLFLOW_STT_URL") {
            stt.url = url;
        }
        if let Some(key) = var("CALLFLOW_STT_API_KEY") {
            stt.api_key = key;
        }
    }

    if let Some(url) = var("CALLFLOW_LLM_URL") {
        config.llm.url = url;
    }
    if let Some(key) = var("CALLFLOW_LLM_API_KEY") {
        config.llm.api_key = key;
    }
    if let Some(model) = var("CALLFLOW_LLM_MODEL") {
        config.llm.model = model;
    }

    if let TtsConfig::Http(tts) = &mut config.tts {
        if let Some(url) = var("CALLFLOW_TTS_URL") {
            tts.url = url;
        }
        if let Some(key) = var("CALLFLOW_TTS_API_KEY") {
            tts.api_key = key;
        }
    }
}
