//! The call orchestrator.
//!
//! A [`Pipeline`] owns one call: it feeds caller audio to the STT adapter,
//! turns each final transcript into a turn task (LLM reply, then streamed
//! TTS), and forwards synthesized audio to its [`PipelineSink`]. At most one
//! turn runs at a time. Caller audio that arrives while the agent is speaking
//! cancels the turn (barge-in) before it reaches STT.
//!
//! Every state change goes through [`PipelineState::transition`] while the
//! control lock is held. The turn task checks its cancellation token under
//! the same lock before each forwarded chunk, so no chunk from a cancelled
//! turn starts reaching the sink once cancellation has been requested.
//!
//! A barge-in holds the unwind lock from the moment it takes the turn until
//! the interrupting frame has reached STT. `stop()` waits on that lock
//! before closing the adapters, so teardown never overtakes a turn that is
//! still unwinding.

mod turn;

use crate::config::PipelineConfig;
use crate::error::VoiceError;
use crate::llm::{ConversationContext, LlmAdapter};
use crate::metrics::MetricsCollector;
use crate::sink::PipelineSink;
use crate::stt::SttAdapter;
use crate::tts::TtsAdapter;
use callflow_types::{InvalidTransition, PipelineMetrics, PipelineState, StateEvent};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument, Span};
use uuid::Uuid;

/// Capacity of the state-change broadcast channel.
const STATE_CHANGE_CAPACITY: usize = 64;

/// One applied state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: PipelineState,
    pub to: PipelineState,
    pub event: StateEvent,
}

/// Real-time voice pipeline for a single call.
pub struct Pipeline {
    inner: Arc<Shared>,
}

pub(crate) struct Shared {
    call_id: Uuid,
    span: Span,
    stt: Arc<dyn SttAdapter>,
    llm: Arc<dyn LlmAdapter>,
    tts: Arc<dyn TtsAdapter>,
    sink: Arc<dyn PipelineSink>,
    config: PipelineConfig,
    control: tokio::sync::Mutex<Control>,
    state_tx: watch::Sender<PipelineState>,
    changes: broadcast::Sender<StateChange>,
    metrics: MetricsCollector,
    context: Mutex<ConversationContext>,
    unwinding: tokio::sync::Mutex<()>,
}

/// Everything guarded by the control lock.
#[derive(Debug, Default)]
struct Control {
    state: PipelineState,
    turn: Option<ActiveTurn>,
    pump: Option<Pump>,
    next_turn_id: u64,
    stopped: bool,
}

#[derive(Debug)]
struct ActiveTurn {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Debug)]
struct Pump {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Pipeline {
    pub fn new(
        stt: Arc<dyn SttAdapter>,
        llm: Arc<dyn LlmAdapter>,
        tts: Arc<dyn TtsAdapter>,
        sink: Arc<dyn PipelineSink>,
        config: PipelineConfig,
    ) -> Self {
        let call_id = Uuid::new_v4();
        let (state_tx, _) = watch::channel(PipelineState::Idle);
        let (changes, _) = broadcast::channel(STATE_CHANGE_CAPACITY);
        let context = ConversationContext::new(
            config.system_prompt.clone(),
            config.max_history_messages,
        );
        Self {
            inner: Arc::new(Shared {
                call_id,
                span: info_span!("call", %call_id),
                stt,
                llm,
                tts,
                sink,
                config,
                control: tokio::sync::Mutex::new(Control::default()),
                state_tx,
                changes,
                metrics: MetricsCollector::new(),
                context: Mutex::new(context),
                unwinding: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn call_id(&self) -> Uuid {
        self.inner.call_id
    }

    pub fn state(&self) -> PipelineState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver that always holds the latest state.
    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.inner.state_tx.subscribe()
    }

    /// Every transition applied from now on, in order.
    pub fn subscribe_states(&self) -> broadcast::Receiver<StateChange> {
        self.inner.changes.subscribe()
    }

    /// Metrics of the most recent turn.
    pub fn metrics(&self) -> PipelineMetrics {
        self.inner.metrics.snapshot()
    }

    /// Copy of the conversation history so far.
    pub fn context(&self) -> ConversationContext {
        self.inner
            .context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Connects STT, initializes TTS and starts listening.
    ///
    /// Either adapter failing is fatal: the error is returned and the
    /// pipeline stays `IDLE`. A pipeline that has been stopped cannot be
    /// started again.
    pub async fn start(&self) -> Result<(), VoiceError> {
        let span = self.inner.span.clone();
        self.inner.start().instrument(span).await
    }

    /// Entry point for one frame of caller audio.
    pub async fn process_audio(&self, audio: &[u8]) -> Result<(), VoiceError> {
        let span = self.inner.span.clone();
        self.inner.process_audio(audio).instrument(span).await
    }

    /// Cancels any turn in flight, closes both adapters and returns to
    /// `IDLE`. Calling it again is a no-op.
    pub async fn stop(&self) {
        let span = self.inner.span.clone();
        self.inner.stop().instrument(span).await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("call_id", &self.inner.call_id)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // Background tasks hold the shared state; stop them if the owner
        // never called `stop()`.
        if let Ok(mut control) = self.inner.control.try_lock() {
            if let Some(turn) = control.turn.take() {
                turn.cancel.cancel();
                turn.handle.abort();
            }
            if let Some(pump) = control.pump.take() {
                pump.cancel.cancel();
            }
        }
    }
}

impl Shared {
    /// Applies `event` to the current state and publishes the result.
    fn apply(
        &self,
        control: &mut Control,
        event: StateEvent,
    ) -> Result<PipelineState, InvalidTransition> {
        let from = control.state;
        let to = from.transition(event)?;
        control.state = to;
        self.state_tx.send_replace(to);
        let _ = self.changes.send(StateChange { from, to, event });
        debug!(%from, %to, ?event, "state transition");
        Ok(to)
    }

    async fn start(self: &Arc<Self>) -> Result<(), VoiceError> {
        let mut control = self.control.lock().await;
        if control.stopped {
            return Err(VoiceError::Config(
                "pipeline has been stopped, start a new one for the next call".to_string(),
            ));
        }
        if control.state != PipelineState::Idle || control.pump.is_some() {
            return Err(VoiceError::Config(format!(
                "pipeline cannot start while {}",
                control.state
            )));
        }

        let (events_tx, events_rx) = mpsc::channel(self.config.transcript_buffer.max(1));
        if let Err(e) = self.stt.connect(events_tx).await {
            error!(error = %e, "STT connect failed");
            return Err(e);
        }
        if let Err(e) = self.tts.initialize().await {
            error!(error = %e, "TTS initialize failed");
            self.stt.close().await;
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            Arc::clone(self)
                .pump_transcripts(events_rx, cancel.clone())
                .instrument(self.span.clone()),
        );
        control.pump = Some(Pump { cancel, handle });
        self.apply(&mut control, StateEvent::Start)?;
        info!("pipeline started");
        Ok(())
    }

    async fn process_audio(&self, audio: &[u8]) -> Result<(), VoiceError> {
        let barge_in = {
            let mut control = self.control.lock().await;
            match control.state {
                PipelineState::Idle => {
                    debug!(bytes = audio.len(), "pipeline idle, dropping audio frame");
                    return Ok(());
                }
                PipelineState::Speaking => {
                    let unwinding = self.unwinding.lock().await;
                    self.apply(&mut control, StateEvent::BargeIn)?;
                    let turn = control.turn.take();
                    if let Some(turn) = &turn {
                        turn.cancel.cancel();
                    }
                    Some((turn, unwinding))
                }
                _ => None,
            }
        };
        self.metrics.audio_received();

        let Some((turn, _unwinding)) = barge_in else {
            return self.stt.send_audio(audio).await;
        };

        if let Some(turn) = turn {
            info!(turn = turn.id, "caller barged in, cancelling reply");
            self.cancel_turn(turn).await;
        }
        {
            let mut control = self.control.lock().await;
            match control.state {
                PipelineState::Interrupted => {
                    self.apply(&mut control, StateEvent::CancelComplete)?;
                }
                PipelineState::Idle => {
                    debug!("pipeline stopped during barge-in, dropping audio frame");
                    return Ok(());
                }
                _ => {}
            }
        }
        self.stt.send_audio(audio).await
    }

    async fn stop(&self) {
        let (turn, pump) = {
            let mut control = self.control.lock().await;
            if control.state == PipelineState::Idle && control.pump.is_none() {
                debug!("pipeline already stopped");
                return;
            }
            let turn = control.turn.take();
            if let Some(turn) = &turn {
                turn.cancel.cancel();
            }
            let pump = control.pump.take();
            if let Some(pump) = &pump {
                pump.cancel.cancel();
            }
            control.stopped = true;
            if control.state != PipelineState::Idle {
                // Stop is accepted from every state.
                let _ = self.apply(&mut control, StateEvent::Stop);
            }
            (turn, pump)
        };

        if let Some(turn) = turn {
            self.cancel_turn(turn).await;
        }
        if let Some(pump) = pump {
            if let Err(e) = pump.handle.await {
                error!(error = %e, "transcript pump ended abnormally");
            }
        }
        // A barge-in may still be joining the turn it took.
        let _unwound = self.unwinding.lock().await;

        self.stt.close().await;
        self.tts.close().await;
        info!("pipeline stopped");
    }
}
