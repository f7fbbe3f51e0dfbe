//! Voice profile and model definitions.
//!
//! A `VoiceProfile` maps a logical ID to a local synthesis model and its
//! parameters. The piper adapter loads one profile per call at
//! initialisation time.
//!
//! Hosted synthesis does not go through profiles; its voice is named in the
//! HTTP adapter's own configuration.

use serde::{Deserialize, Serialize};

/// Supported local synthesis models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceModel {
    /// Piper TTS (ONNX-based, fast, local).
    #[default]
    Piper,
}

/// A voice profile configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    /// Unique identifier for the voice profile.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// The synthesis backend.
    #[serde(default)]
    pub model: VoiceModel,
    /// Path to the model file (relative to the voices directory or absolute).
    pub model_path: String,
    /// Path to the model configuration file (if applicable).
    #[serde(default)]
    pub config_path: Option<String>,
    /// Speech speed multiplier (1.0 is normal).
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Speaker ID within a multi-speaker model (0-indexed).
    #[serde(default)]
    pub speaker_id: Option<u32>,
}

fn default_speed() -> f32 {
    1.0
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            name: "Default Voice".to_string(),
            model: VoiceModel::Piper,
            model_path: "en_US-lessac-medium.onnx".to_string(),
            config_path: Some("en_US-lessac-medium.onnx.json".to_string()),
            speed: default_speed(),
            speaker_id: None,
        }
    }
}
