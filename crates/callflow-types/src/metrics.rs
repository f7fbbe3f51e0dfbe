//! Per-turn latency metrics.

use serde::{Deserialize, Serialize};

/// Snapshot of the most recent (completed or in-flight) turn.
///
/// All latencies are whole milliseconds. A field stays `0` until the stage it
/// measures has been reached in the current turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    /// Sequence number of the turn these values describe (1-based, 0 = none).
    pub turn_id: u64,
    /// Last caller audio frame to final transcript.
    pub stt_latency_ms: u64,
    /// Final transcript to complete LLM reply.
    pub llm_latency_ms: u64,
    /// Complete LLM reply to first synthesized audio chunk.
    pub tts_latency_ms: u64,
    /// Final transcript to first audio chunk forwarded to the caller.
    pub total_latency_ms: u64,
    /// Final transcript to turn completion (exhausted, failed or cancelled).
    pub turn_duration_ms: u64,
    /// Tokens in the reply, as reported by the provider or estimated.
    pub tokens_generated: u64,
    /// Audio chunks forwarded to the caller during the turn.
    pub audio_chunks: u64,
    /// Whether the turn ended by barge-in or teardown.
    pub interrupted: bool,
}
