//! The per-call pipeline state machine.
//!
//! States form a closed set and every change goes through
//! [`PipelineState::transition`], so an illegal move (for example scheduling
//! a second turn while one is speaking) is rejected instead of silently
//! overwriting the state.

use serde::{Deserialize, Serialize};

/// Exactly one of these holds for a call at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    /// Not started, or torn down.
    #[default]
    Idle,
    /// Waiting for a final transcript.
    Listening,
    /// A turn is in flight and no audio has been produced yet.
    Processing,
    /// The turn is forwarding synthesized audio to the caller.
    Speaking,
    /// The caller barged in; the turn is being cancelled.
    Interrupted,
}

/// Inputs that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateEvent {
    /// The pipeline was started.
    Start,
    /// A final, non-empty transcript was accepted and a turn scheduled.
    FinalTranscript,
    /// The turn forwarded its first audio chunk.
    FirstAudio,
    /// Caller audio arrived while speaking.
    BargeIn,
    /// The interrupted turn has finished unwinding.
    CancelComplete,
    /// The turn finished on its own (stream exhausted or turn failed).
    TurnEnded,
    /// The pipeline is being torn down.
    Stop,
}

/// Returned when an event is not valid in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid pipeline transition: {event:?} while {from}")]
pub struct InvalidTransition {
    pub from: PipelineState,
    pub event: StateEvent,
}

impl PipelineState {
    /// Computes the state that follows `event`.
    ///
    /// `Stop` is accepted from every state. All other events are only valid
    /// from the single state the call flow allows them in.
    pub fn transition(self, event: StateEvent) -> Result<PipelineState, InvalidTransition> {
        use PipelineState::*;
        use StateEvent::*;

        let next = match (self, event) {
            (_, Stop) => Idle,
            (Idle, Start) => Listening,
            (Listening, FinalTranscript) => Processing,
            (Processing, FirstAudio) => Speaking,
            (Speaking, BargeIn) => Interrupted,
            (Interrupted, CancelComplete) => Listening,
            (Processing | Speaking, TurnEnded) => Listening,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }

    /// Whether a turn task may exist in this state.
    pub fn has_turn(self) -> bool {
        matches!(self, Self::Processing | Self::Speaking | Self::Interrupted)
    }

    /// Returns the canonical string label for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Listening => "LISTENING",
            Self::Processing => "PROCESSING",
            Self::Speaking => "SPEAKING",
            Self::Interrupted => "INTERRUPTED",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PipelineState {
    type Err = ParsePipelineStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(Self::Idle),
            "LISTENING" => Ok(Self::Listening),
            "PROCESSING" => Ok(Self::Processing),
            "SPEAKING" => Ok(Self::Speaking),
            "INTERRUPTED" => Ok(Self::Interrupted),
            _ => Err(ParsePipelineStateError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown pipeline state label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown pipeline state: {0}")]
pub struct ParsePipelineStateError(pub String);
