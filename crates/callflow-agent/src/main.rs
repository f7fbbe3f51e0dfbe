//! Callflow agent binary: runs one call through the voice pipeline.
//!
//! Reads raw s16le mono caller audio from stdin, writes the agent's
//! synthesized audio to stdout, and logs to stderr. Stands in for the
//! telephony transport during local runs:
//!
//! ```text
//! sox caller.wav -t raw -r 16000 -e signed -b 16 -c 1 - \
//!   | callflow-agent callflow.toml > agent.raw
//! ```

mod config;
mod sink;

use callflow_voice::{
    ChatLlm, HttpTts, LlmAdapter, Pipeline, PipelineSink, PiperTts, StreamingStt, SttAdapter,
    TtsAdapter, VoiceError, WhisperStt,
};
use config::{AudioConfig, SttConfig, TtsConfig};
use sink::WriterSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("CALLFLOW_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn build_stt(config: &SttConfig) -> Arc<dyn SttAdapter> {
    match config {
        SttConfig::Streaming(streaming) => Arc::new(StreamingStt::new(streaming.clone())),
        SttConfig::Whisper(whisper) => Arc::new(WhisperStt::new(whisper.clone())),
    }
}

fn build_tts(config: &TtsConfig) -> Arc<dyn TtsAdapter> {
    match config {
        TtsConfig::Http(http) => Arc::new(HttpTts::new(http.clone())),
        TtsConfig::Piper(piper) => Arc::new(PiperTts::new(piper.clone())),
    }
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("callflow.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration: the agent cannot start without valid config");

    // stdout carries audio, so logs go to stderr
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let llm: Arc<dyn LlmAdapter> = Arc::new(
        ChatLlm::new(config.llm.clone()).expect("invalid LLM configuration: check [llm] in config"),
    );
    let sink: Arc<dyn PipelineSink> = Arc::new(WriterSink::new(tokio::io::stdout()));
    let pipeline = Pipeline::new(
        build_stt(&config.stt),
        llm,
        build_tts(&config.tts),
        sink,
        config.pipeline.clone(),
    );

    tracing::info!(call_id = %pipeline.call_id(), "starting call");
    if let Err(e) = pipeline.start().await {
        tracing::error!(error = %e, "call could not start");
        std::process::exit(1);
    }

    tokio::select! {
        result = run_call(&pipeline, &config.audio, tokio::io::stdin()) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "call ended with an error");
            }
        }
        () = shutdown_signal() => {}
    }

    pipeline.stop().await;

    let metrics = pipeline.metrics();
    tracing::info!(
        turn = metrics.turn_id,
        stt_latency_ms = metrics.stt_latency_ms,
        llm_latency_ms = metrics.llm_latency_ms,
        tts_latency_ms = metrics.tts_latency_ms,
        total_latency_ms = metrics.total_latency_ms,
        tokens = metrics.tokens_generated,
        interrupted = metrics.interrupted,
        "call finished"
    );
}

/// Feeds caller audio to the pipeline frame by frame, then lets the last
/// turn play out.
async fn run_call<R>(pipeline: &Pipeline, audio: &AudioConfig, input: R) -> Result<(), VoiceError>
where
    R: AsyncRead + Unpin,
{
    pump_frames(pipeline, audio, input).await?;
    tracing::info!("caller audio ended");

    tokio::time::sleep(Duration::from_millis(audio.drain_ms)).await;
    let mut state = pipeline.watch_state();
    state
        .wait_for(|state| !state.has_turn())
        .await
        .map_err(|_| VoiceError::Output("pipeline state channel closed".to_string()))?;
    Ok(())
}

async fn pump_frames<R>(pipeline: &Pipeline, audio: &AudioConfig, mut input: R) -> Result<(), VoiceError>
where
    R: AsyncRead + Unpin,
{
    let frame_bytes = audio.frame_bytes();
    if frame_bytes == 0 {
        return Err(VoiceError::Config(
            "audio.frame_ms and audio.sample_rate must be positive".to_string(),
        ));
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(audio.frame_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut frame = vec![0u8; frame_bytes];
    loop {
        let filled = read_frame(&mut input, &mut frame).await?;
        if filled == 0 {
            return Ok(());
        }
        if audio.realtime {
            ticker.tick().await;
        }
        pipeline.process_audio(&frame[..filled]).await?;
        if filled < frame_bytes {
            return Ok(());
        }
    }
}

/// Fills `frame` unless the input ends first; returns the bytes read.
async fn read_frame<R>(input: &mut R, frame: &mut [u8]) -> Result<usize, VoiceError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < frame.len() {
        let n = input.read(&mut frame[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, hanging up"); }
        () = terminate => { tracing::info!("received SIGTERM, hanging up"); }
    }
}
