#![allow(dead_code)]

use async_trait::async_trait;
use callflow_types::{PipelineState, TranscriptEvent};
use callflow_voice::{
    AudioChunk, AudioStream, ConversationContext, LlmAdapter, LlmReply, Pipeline,
    PipelineConfig, PipelineSink, SttAdapter, StateChange, TranscriptSender, TtsAdapter,
    VoiceError,
};
use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

/// STT stand-in: records audio, emits whatever the test tells it to.
#[derive(Default)]
pub struct ScriptedStt {
    events: Mutex<Option<TranscriptSender>>,
    audio: Mutex<Vec<Vec<u8>>>,
    fail_connect: bool,
    closes: AtomicUsize,
}

impl ScriptedStt {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_connect: true,
            ..Self::default()
        })
    }

    pub async fn emit(&self, event: TranscriptEvent) {
        let tx = self
            .events
            .lock()
            .unwrap()
            .clone()
            .expect("STT not connected");
        tx.send(event).await.unwrap();
    }

    pub fn audio_frames(&self) -> Vec<Vec<u8>> {
        self.audio.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SttAdapter for ScriptedStt {
    async fn connect(&self, events: TranscriptSender) -> Result<(), VoiceError> {
        if self.fail_connect {
            return Err(VoiceError::Stt("connection refused".to_string()));
        }
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn send_audio(&self, audio: &[u8]) -> Result<(), VoiceError> {
        self.audio.lock().unwrap().push(audio.to_vec());
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().take();
    }
}

/// LLM stand-in with a fixed reply or failure.
pub struct ScriptedLlm {
    reply: Result<String, String>,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: AtomicUsize,
    history_lens: Mutex<Vec<usize>>,
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedLlm {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            delay: None,
            gate: None,
            calls: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: AtomicUsize::new(0),
            history_lens: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            ..Self::replying("")
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Each call waits for one `notify_one` on `gate` before replying.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// History length seen by each call, in call order.
    pub fn history_lens(&self) -> Vec<usize> {
        self.history_lens.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmAdapter for ScriptedLlm {
    async fn generate_response(
        &self,
        _utterance: &str,
        context: &ConversationContext,
    ) -> Result<LlmReply, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.history_lens.lock().unwrap().push(context.len());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(Arc::clone(&self.in_flight));

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.reply {
            Ok(text) => Ok(LlmReply::new(text.clone())),
            Err(message) => Err(VoiceError::Llm(message.clone())),
        }
    }
}

/// TTS stand-in yielding fixed chunks, optionally pausing mid-stream.
pub struct ScriptedTts {
    chunks: Vec<Vec<u8>>,
    pause_after: Option<usize>,
    fail_init: bool,
    resume: Arc<Notify>,
    texts: Mutex<Vec<String>>,
    initialized: AtomicUsize,
    closes: AtomicUsize,
    dropped_streams: Arc<AtomicUsize>,
}

struct StreamGuard(Arc<AtomicUsize>);

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl ScriptedTts {
    pub fn with_chunks(count: usize) -> Self {
        Self {
            chunks: (0..count).map(|i| vec![i as u8; 320]).collect(),
            pause_after: None,
            fail_init: false,
            resume: Arc::new(Notify::new()),
            texts: Mutex::new(Vec::new()),
            initialized: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            dropped_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_init() -> Self {
        Self {
            fail_init: true,
            ..Self::with_chunks(0)
        }
    }

    /// Stops after `n` chunks until [`ScriptedTts::resume`] is called.
    pub fn pausing_after(mut self, n: usize) -> Self {
        self.pause_after = Some(n);
        self
    }

    pub fn resume(&self) {
        self.resume.notify_waiters();
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    pub fn init_count(&self) -> usize {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Streams released, whether exhausted or abandoned.
    pub fn dropped_streams(&self) -> usize {
        self.dropped_streams.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TtsAdapter for ScriptedTts {
    async fn initialize(&self) -> Result<(), VoiceError> {
        if self.fail_init {
            return Err(VoiceError::Tts("voice model failed to load".to_string()));
        }
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn synthesize(&self, text: &str) -> Result<AudioStream, VoiceError> {
        self.texts.lock().unwrap().push(text.to_string());
        let chunks = self.chunks.clone();
        let pause_after = self.pause_after;
        let resume = Arc::clone(&self.resume);
        let guard = StreamGuard(Arc::clone(&self.dropped_streams));

        let stream = stream::unfold((0usize, guard), move |(index, guard)| {
            let chunk = chunks.get(index).cloned();
            let resume = Arc::clone(&resume);
            async move {
                if pause_after == Some(index) {
                    resume.notified().await;
                }
                let chunk = chunk?;
                Some((Ok(AudioChunk::new(chunk)), (index + 1, guard)))
            }
        });
        Ok(stream.boxed())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sink that records everything it is handed.
#[derive(Default)]
pub struct RecordingSink {
    chunks: Mutex<Vec<AudioChunk>>,
    transcripts: Mutex<Vec<TranscriptEvent>>,
    hang: bool,
    gate: Option<Arc<Notify>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A sink whose `on_audio_output` never returns.
    pub fn hanging() -> Arc<Self> {
        Arc::new(Self {
            hang: true,
            ..Self::default()
        })
    }

    /// A sink that records each chunk, then waits for one `notify_one` on
    /// `gate` before returning.
    pub fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Self::default()
        })
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }

    pub fn chunks(&self) -> Vec<AudioChunk> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn transcripts(&self) -> Vec<TranscriptEvent> {
        self.transcripts.lock().unwrap().clone()
    }
}

#[async_trait]
impl PipelineSink for RecordingSink {
    async fn on_audio_output(&self, chunk: AudioChunk) -> Result<(), VoiceError> {
        self.chunks.lock().unwrap().push(chunk);
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(())
    }

    async fn on_transcript(&self, event: &TranscriptEvent) {
        self.transcripts.lock().unwrap().push(event.clone());
    }
}

pub fn pipeline(
    stt: &Arc<ScriptedStt>,
    llm: &Arc<ScriptedLlm>,
    tts: &Arc<ScriptedTts>,
    sink: &Arc<RecordingSink>,
    config: PipelineConfig,
) -> Pipeline {
    Pipeline::new(
        Arc::clone(stt) as Arc<dyn SttAdapter>,
        Arc::clone(llm) as Arc<dyn LlmAdapter>,
        Arc::clone(tts) as Arc<dyn TtsAdapter>,
        Arc::clone(sink) as Arc<dyn PipelineSink>,
        config,
    )
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Waits for the next transition and checks where it went.
pub async fn expect_transition(
    changes: &mut broadcast::Receiver<StateChange>,
    from: PipelineState,
    to: PipelineState,
) {
    let change = tokio::time::timeout(Duration::from_secs(2), changes.recv())
        .await
        .expect("no state transition in time")
        .expect("state channel closed");
    assert_eq!((change.from, change.to), (from, to), "unexpected transition");
}
