use callflow_types::voice::VoiceProfile;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

fn default_max_history_messages() -> usize {
    20
}

fn default_transcript_buffer() -> usize {
    256
}

/// Orchestrator settings for a single call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Instructions prepended to every LLM request.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Conversation messages kept as LLM context. Whole exchanges are
    /// dropped, oldest first.
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
    /// Capacity of the transcript event queue between STT and orchestrator.
    #[serde(default = "default_transcript_buffer")]
    pub transcript_buffer: usize,
    /// Upper bound on waiting for a cancelled turn to unwind. Unset means wait
    /// for as long as the adapters take.
    #[serde(default)]
    pub cancel_timeout_ms: Option<u64>,
    /// Fixed text spoken when a turn fails. Unset means the turn fails silent.
    #[serde(default)]
    pub failure_reprompt: Option<String>,
    /// Final transcripts below this confidence are surfaced but never answered.
    #[serde(default)]
    pub min_transcript_confidence: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_history_messages: default_max_history_messages(),
            transcript_buffer: default_transcript_buffer(),
            cancel_timeout_ms: None,
            failure_reprompt: None,
            min_transcript_confidence: 0.0,
        }
    }
}

impl PipelineConfig {
    pub fn cancel_timeout(&self) -> Option<Duration> {
        self.cancel_timeout_ms.map(Duration::from_millis)
    }
}

fn default_stt_encoding() -> String {
    "linear16".to_string()
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_channels() -> u16 {
    1
}

fn default_true() -> bool {
    true
}

fn default_keepalive_interval_ms() -> u64 {
    5_000
}

fn default_send_queue_frames() -> usize {
    256
}

fn default_auth_scheme() -> String {
    "Token".to_string()
}

/// Streaming WebSocket transcription provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct StreamingSttConfig {
    /// WebSocket endpoint, e.g. `wss://stt.example.com/v1/listen`.
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Scheme placed before the key in the `Authorization` header.
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "default_stt_encoding")]
    pub encoding: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    /// Ask the provider for partial results (live captions).
    #[serde(default = "default_true")]
    pub interim_results: bool,
    /// Idle time after which a keep-alive message is sent.
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    /// Audio frames buffered ahead of the socket before frames are dropped.
    #[serde(default = "default_send_queue_frames")]
    pub send_queue_frames: usize,
}

impl Default for StreamingSttConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            auth_scheme: default_auth_scheme(),
            model: None,
            language: None,
            encoding: default_stt_encoding(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            interim_results: true,
            keepalive_interval_ms: default_keepalive_interval_ms(),
            send_queue_frames: default_send_queue_frames(),
        }
    }
}

impl fmt::Debug for StreamingSttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingSttConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("auth_scheme", &self.auth_scheme)
            .field("model", &self.model)
            .field("language", &self.language)
            .field("encoding", &self.encoding)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("interim_results", &self.interim_results)
            .field("keepalive_interval_ms", &self.keepalive_interval_ms)
            .field("send_queue_frames", &self.send_queue_frames)
            .finish()
    }
}

fn default_whisper_binary() -> PathBuf {
    PathBuf::from("whisper-cli")
}

fn default_speech_threshold() -> f32 {
    0.02
}

fn default_silence_ms() -> u64 {
    700
}

fn default_min_speech_ms() -> u64 {
    250
}

fn default_max_utterance_ms() -> u64 {
    30_000
}

/// Local whisper.cpp transcription with energy-based endpointing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperSttConfig {
    pub model_path: PathBuf,
    #[serde(default = "default_whisper_binary")]
    pub binary_path: PathBuf,
    /// Sample rate of the incoming s16le mono audio.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Normalised RMS level above which a frame counts as speech.
    #[serde(default = "default_speech_threshold")]
    pub speech_threshold: f32,
    /// Trailing silence that ends an utterance.
    #[serde(default = "default_silence_ms")]
    pub silence_ms: u64,
    /// Utterances with less speech than this are discarded as noise.
    #[serde(default = "default_min_speech_ms")]
    pub min_speech_ms: u64,
    /// Utterances are cut at this length even without a pause.
    #[serde(default = "default_max_utterance_ms")]
    pub max_utterance_ms: u64,
}

impl WhisperSttConfig {
    pub fn new(model_path: impl Into<PathBuf>, binary_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            binary_path: binary_path.into(),
            sample_rate: default_sample_rate(),
            speech_threshold: default_speech_threshold(),
            silence_ms: default_silence_ms(),
            min_speech_ms: default_min_speech_ms(),
            max_utterance_ms: default_max_utterance_ms(),
        }
    }
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    256
}

fn default_llm_timeout_ms() -> u64 {
    20_000
}

/// OpenAI-compatible chat-completions provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct ChatLlmConfig {
    /// Base URL; `/chat/completions` is appended.
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ChatLlmConfig {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            api_key: String::new(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_ms: default_llm_timeout_ms(),
        }
    }
}

impl fmt::Debug for ChatLlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatLlmConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

fn default_tts_format() -> String {
    "pcm_s16le".to_string()
}

fn default_chunk_bytes() -> usize {
    3_200
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

/// Streaming HTTP synthesis provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct HttpTtsConfig {
    /// Synthesis endpoint receiving `POST {text, voice, format, sample_rate}`.
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default = "default_tts_format")]
    pub format: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Size of each chunk handed to the caller. Must be even (s16 samples).
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for HttpTtsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            voice: None,
            format: default_tts_format(),
            sample_rate: default_sample_rate(),
            chunk_bytes: default_chunk_bytes(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl fmt::Debug for HttpTtsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTtsConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("voice", &self.voice)
            .field("format", &self.format)
            .field("sample_rate", &self.sample_rate)
            .field("chunk_bytes", &self.chunk_bytes)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

fn default_voices_dir() -> PathBuf {
    PathBuf::from("assets/voices")
}

fn default_piper_binary() -> PathBuf {
    PathBuf::from("piper")
}

/// Local Piper synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiperTtsConfig {
    #[serde(default = "default_voices_dir")]
    pub voices_dir: PathBuf,
    #[serde(default = "default_piper_binary")]
    pub binary_path: PathBuf,
    #[serde(default)]
    pub profile: VoiceProfile,
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,
}

impl Default for PiperTtsConfig {
    fn default() -> Self {
        Self {
            voices_dir: default_voices_dir(),
            binary_path: default_piper_binary(),
            profile: VoiceProfile::default(),
            chunk_bytes: default_chunk_bytes(),
        }
    }
}
