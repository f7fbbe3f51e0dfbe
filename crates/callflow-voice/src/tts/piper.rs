use super::{check_input_size, TtsAdapter};
use crate::audio::{rechunk, AudioStream};
use crate::config::PiperTtsConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// Upper bound on one piper run, from spawn to exit.
const TTS_TIMEOUT: Duration = Duration::from_secs(60);

/// Local synthesis through the `piper` binary.
///
/// Each `synthesize` call spawns one piper process and streams its raw PCM
/// stdout. The process is killed when the stream is dropped.
#[derive(Debug)]
pub struct PiperTts {
    config: PiperTtsConfig,
    resolved: Mutex<Option<ResolvedVoice>>,
}

#[derive(Debug, Clone)]
struct ResolvedVoice {
    model_path: PathBuf,
    config_path: Option<PathBuf>,
}

impl PiperTts {
    pub fn new(config: PiperTtsConfig) -> Self {
        Self {
            config,
            resolved: Mutex::new(None),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            self.config.voices_dir.join(path)
        }
    }

    fn command(&self, voice: &ResolvedVoice) -> Command {
        let profile = &self.config.profile;
        let mut command = Command::new(&self.config.binary_path);
        command
            .arg("--model")
            .arg(&voice.model_path)
            .arg("--output_raw")
            // length_scale is the inverse of speed: 2.0x speed halves durations
            .arg("--length_scale")
            .arg((1.0 / profile.speed).to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(config_path) = &voice.config_path {
            command.arg("--config").arg(config_path);
        }
        if let Some(speaker) = profile.speaker_id {
            command.arg("--speaker").arg(speaker.to_string());
        }
        command
    }
}

#[async_trait]
impl TtsAdapter for PiperTts {
    async fn initialize(&self) -> Result<(), VoiceError> {
        let profile = &self.config.profile;
        let model_path = self.resolve(&profile.model_path);
        if !model_path.exists() {
            return Err(VoiceError::Tts(format!(
                "Model file not found: {:?}",
                model_path
            )));
        }

        if profile.speed < 0.1 || profile.speed > 10.0 {
            return Err(VoiceError::Config(
                "Speed must be between 0.1 and 10.0".to_string(),
            ));
        }

        if self.config.binary_path.is_absolute() && !self.config.binary_path.exists() {
            return Err(VoiceError::Tts(format!(
                "piper binary not found: {:?}",
                self.config.binary_path
            )));
        }

        if self.config.chunk_bytes % 2 != 0 {
            return Err(VoiceError::Config(format!(
                "TTS chunk_bytes must be a whole number of 16-bit samples, got {}",
                self.config.chunk_bytes
            )));
        }

        let voice = ResolvedVoice {
            model_path,
            config_path: profile.config_path.as_deref().map(|p| self.resolve(p)),
        };
        info!(profile = %profile.id, model = ?voice.model_path, "piper voice ready");
        *self.resolved.lock().unwrap_or_else(PoisonError::into_inner) = Some(voice);
        Ok(())
    }

    async fn synthesize(&self, text: &str) -> Result<AudioStream, VoiceError> {
        check_input_size(text)?;
        let voice = self
            .resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| VoiceError::Tts("synthesizer is not initialized".to_string()))?;

        let mut child = self
            .command(&voice)
            .spawn()
            .map_err(|e| VoiceError::Tts(format!("Failed to spawn piper: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Tts("Failed to open stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VoiceError::Tts("Failed to open stdout".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| VoiceError::Tts("Failed to open stderr".to_string()))?;

        // Written from a task so a full stdout pipe cannot deadlock the write.
        let text_owned = text.to_string();
        let writer = tokio::spawn(async move {
            stdin.write_all(text_owned.as_bytes()).await?;
            stdin.shutdown().await
        });
        let stderr_reader = tokio::spawn(async move {
            let mut output = String::new();
            let _ = stderr.read_to_string(&mut output).await;
            output
        });

        debug!(chars = text.len(), "piper started");
        let exit = PiperExit {
            child,
            writer,
            stderr: stderr_reader,
        };
        let audio = ReaderStream::new(stdout).map(|read| read.map_err(VoiceError::from));
        let status = stream::once(exit.wait())
            .filter_map(|result| future::ready(result.err().map(Err)));

        Ok(rechunk(audio.chain(status), self.config.chunk_bytes))
    }

    async fn close(&self) {
        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Everything needed to judge a piper run once its stdout is drained.
struct PiperExit {
    child: Child,
    writer: JoinHandle<std::io::Result<()>>,
    stderr: JoinHandle<String>,
}

impl PiperExit {
    async fn wait(mut self) -> Result<(), VoiceError> {
        let status = tokio::time::timeout(TTS_TIMEOUT, self.child.wait())
            .await
            .map_err(|_| VoiceError::Timeout {
                operation: "piper synthesis",
                after: TTS_TIMEOUT,
            })?
            .map_err(|e| VoiceError::Tts(format!("Failed to wait for piper: {}", e)))?;

        if !status.success() {
            let stderr = self.stderr.await.unwrap_or_default();
            return Err(VoiceError::Tts(format!("Piper failed: {}", stderr.trim())));
        }

        match self.writer.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(VoiceError::Tts(format!(
                "Failed to write to piper stdin: {}",
                e
            ))),
            Err(e) => Err(VoiceError::Tts(format!("Stdin task failed: {}", e))),
        }
    }
}
