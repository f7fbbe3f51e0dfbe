//! Real-time voice call pipeline.
//!
//! Streams caller audio to a speech-to-text provider, sends each final
//! utterance to a language model, and streams the synthesized reply back to
//! the caller, with barge-in: caller audio that arrives while the agent is
//! speaking cancels the reply and returns the pipeline to listening.
//!
//! The orchestrator ([`Pipeline`]) is provider-agnostic. It talks to the
//! providers through the [`SttAdapter`], [`LlmAdapter`] and [`TtsAdapter`]
//! traits and reports to a single [`PipelineSink`]. Concrete adapters for
//! hosted (WebSocket/HTTP) and local (whisper.cpp/Piper) providers live in
//! [`stt`], [`llm`] and [`tts`].

pub mod audio;
pub mod config;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod sink;
pub mod stt;
pub mod tts;

pub use audio::{AudioChunk, AudioStream};
pub use callflow_types::{PipelineMetrics, PipelineState, StateEvent, TranscriptEvent};
pub use config::{
    ChatLlmConfig, HttpTtsConfig, PipelineConfig, PiperTtsConfig, StreamingSttConfig,
    WhisperSttConfig,
};
pub use error::VoiceError;
pub use llm::{ChatLlm, ConversationContext, LlmAdapter, LlmReply};
pub use metrics::MetricsCollector;
pub use pipeline::{Pipeline, StateChange};
pub use sink::PipelineSink;
pub use stt::{SttAdapter, StreamingStt, TranscriptSender, WhisperStt};
pub use tts::{HttpTts, PiperTts, TtsAdapter};
