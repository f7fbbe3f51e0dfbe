//! Shared types for the Callflow voice call pipeline.
//!
//! This crate holds the data that crosses the boundary between the call
//! pipeline and its collaborators: transcript events handed to persistence,
//! metric snapshots consumed by usage metering, the pipeline state machine,
//! conversation messages, and voice profiles.
//!
//! Nothing here performs I/O. Every type is `serde`-serialisable so the
//! collaborators can store or forward it without conversion.

mod chat;
mod metrics;
mod state;
mod transcript;
pub mod voice;

pub use chat::{ChatMessage, ChatRole};
pub use metrics::PipelineMetrics;
pub use state::{InvalidTransition, ParsePipelineStateError, PipelineState, StateEvent};
pub use transcript::TranscriptEvent;
