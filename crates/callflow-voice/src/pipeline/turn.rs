use super::{ActiveTurn, Shared};
use crate::audio::AudioChunk;
use crate::error::VoiceError;
use callflow_types::{PipelineState, StateEvent, TranscriptEvent};
use futures_util::StreamExt;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// How long an aborted turn task gets to unwind.
const ABORT_GRACE: Duration = Duration::from_secs(1);

/// How a turn task ended when it was not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Cancelled,
}

impl Shared {
    /// Drains STT events in provider order until cancelled or the adapter
    /// drops its sender.
    pub(super) async fn pump_transcripts(
        self: Arc<Self>,
        mut events: mpsc::Receiver<TranscriptEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                debug!("transcript stream ended");
                break;
            };

            self.sink.on_transcript(&event).await;

            let Some(utterance) = event.utterance() else {
                continue;
            };
            if event.confidence < self.config.min_transcript_confidence {
                debug!(
                    confidence = event.confidence,
                    "final transcript below confidence floor, ignoring"
                );
                continue;
            }
            self.schedule_turn(utterance.to_string()).await;
        }
    }

    /// Starts a turn for `utterance` if the pipeline is listening.
    async fn schedule_turn(self: &Arc<Self>, utterance: String) {
        let mut control = self.control.lock().await;
        if control.state != PipelineState::Listening {
            debug!(state = %control.state, "not listening, final transcript not scheduled");
            return;
        }

        control.next_turn_id += 1;
        let id = control.next_turn_id;
        if let Err(e) = self.apply(&mut control, StateEvent::FinalTranscript) {
            warn!(error = %e, "could not open turn");
            return;
        }
        self.metrics.turn_started(id);
        info!(turn = id, chars = utterance.len(), "final transcript, starting turn");

        let cancel = CancellationToken::new();
        let span = info_span!(parent: &self.span, "turn", turn = id);
        let handle = tokio::spawn(
            Arc::clone(self)
                .run_turn(id, utterance, cancel.clone())
                .instrument(span),
        );
        control.turn = Some(ActiveTurn { id, cancel, handle });
    }

    async fn run_turn(self: Arc<Self>, id: u64, utterance: String, cancel: CancellationToken) {
        match self.drive_turn(id, &utterance, &cancel).await {
            Ok(Outcome::Completed) => {
                let metrics = self.metrics.snapshot();
                info!(
                    total_latency_ms = metrics.total_latency_ms,
                    chunks = metrics.audio_chunks,
                    "turn complete"
                );
            }
            Ok(Outcome::Cancelled) => {
                debug!("turn cancelled");
                return;
            }
            Err(e) => {
                error!(error = %e, "turn failed");
                if let Some(reprompt) = self.config.failure_reprompt.as_deref() {
                    match self.speak(id, reprompt, &cancel).await {
                        Ok(Outcome::Cancelled) => return,
                        Ok(Outcome::Completed) => debug!("reprompt spoken"),
                        Err(e) => warn!(error = %e, "reprompt failed"),
                    }
                }
            }
        }

        self.metrics.turn_finished(id, false);
        self.finish_turn(id).await;
    }

    async fn drive_turn(
        &self,
        id: u64,
        utterance: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome, VoiceError> {
        let context = self
            .context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let reply = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(Outcome::Cancelled),
            reply = self.llm.generate_response(utterance, &context) => reply?,
        };

        let tokens = reply.token_count();
        self.metrics.llm_responded(id, tokens);
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_exchange(utterance, &reply.text);
        debug!(
            latency_ms = self.metrics.snapshot().llm_latency_ms,
            tokens, "LLM replied"
        );

        if reply.text.trim().is_empty() {
            warn!("LLM returned an empty reply, nothing to say");
            return Ok(Outcome::Completed);
        }
        self.speak(id, &reply.text, cancel).await
    }

    /// Synthesizes `text` and forwards it chunk by chunk.
    async fn speak(
        &self,
        id: u64,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome, VoiceError> {
        let mut audio = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(Outcome::Cancelled),
            stream = self.tts.synthesize(text) => stream?,
        };

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(Outcome::Cancelled),
                next = audio.next() => next,
            };
            let Some(chunk) = next else {
                return Ok(Outcome::Completed);
            };
            if !self.forward(id, chunk?, cancel).await? {
                return Ok(Outcome::Cancelled);
            }
        }
    }

    /// Hands one chunk to the sink unless the turn has been cancelled.
    ///
    /// The cancellation check and the first-audio transition happen under the
    /// control lock. The sink call itself runs unlocked and is never
    /// interrupted, so a chunk is delivered whole or not at all.
    async fn forward(
        &self,
        id: u64,
        chunk: AudioChunk,
        cancel: &CancellationToken,
    ) -> Result<bool, VoiceError> {
        {
            let mut control = self.control.lock().await;
            if cancel.is_cancelled() {
                return Ok(false);
            }
            if control.state == PipelineState::Processing {
                self.apply(&mut control, StateEvent::FirstAudio)?;
            }
        }
        self.metrics.chunk_forwarded(id);
        self.sink.on_audio_output(chunk).await?;
        Ok(true)
    }

    /// Returns to listening if turn `id` is still the active one.
    async fn finish_turn(&self, id: u64) {
        let mut control = self.control.lock().await;
        if !control.turn.as_ref().is_some_and(|turn| turn.id == id) {
            return;
        }
        control.turn = None;
        if let Err(e) = self.apply(&mut control, StateEvent::TurnEnded) {
            warn!(error = %e, "turn ended in unexpected state");
        }
    }

    /// Waits for a cancelled turn task to unwind.
    pub(super) async fn cancel_turn(&self, turn: ActiveTurn) {
        let ActiveTurn {
            id,
            cancel,
            mut handle,
        } = turn;
        cancel.cancel();

        let joined = match self.config.cancel_timeout() {
            None => Some((&mut handle).await),
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => Some(joined),
                Err(_) => {
                    warn!(
                        turn = id,
                        timeout_ms = limit.as_millis() as u64,
                        "turn did not stop in time, aborting"
                    );
                    handle.abort();
                    if tokio::time::timeout(ABORT_GRACE, &mut handle).await.is_err() {
                        error!(turn = id, "aborted turn task did not unwind");
                    }
                    None
                }
            },
        };
        if let Some(Err(e)) = joined {
            if e.is_panic() {
                error!(turn = id, "turn task panicked");
            }
        }

        self.metrics.turn_finished(id, true);
        debug!(turn = id, "turn cancelled");
    }
}
