use callflow_types::PipelineMetrics;
use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;

/// Per-turn latency bookkeeping.
///
/// Passive: the orchestrator reports events, observers read snapshots. Only
/// the most recent turn is kept.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    inner: Mutex<Timeline>,
}

#[derive(Debug, Default)]
struct Timeline {
    last_audio_at: Option<Instant>,
    turn: Option<TurnMarks>,
    current: PipelineMetrics,
}

#[derive(Debug)]
struct TurnMarks {
    id: u64,
    final_at: Instant,
    llm_at: Option<Instant>,
    first_chunk_at: Option<Instant>,
}

fn millis(later: Instant, earlier: Instant) -> u64 {
    later.saturating_duration_since(earlier).as_millis() as u64
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Timeline) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn snapshot(&self) -> PipelineMetrics {
        self.with(|t| t.current)
    }

    /// A caller audio frame arrived.
    pub fn audio_received(&self) {
        let now = Instant::now();
        self.with(|t| t.last_audio_at = Some(now));
    }

    /// A final transcript opened turn `id`.
    pub fn turn_started(&self, id: u64) {
        let now = Instant::now();
        self.with(|t| {
            t.current = PipelineMetrics {
                turn_id: id,
                stt_latency_ms: t.last_audio_at.map_or(0, |at| millis(now, at)),
                ..PipelineMetrics::default()
            };
            t.turn = Some(TurnMarks {
                id,
                final_at: now,
                llm_at: None,
                first_chunk_at: None,
            });
        });
    }

    pub fn llm_responded(&self, id: u64, tokens: u64) {
        let now = Instant::now();
        self.with(|t| {
            let Some(marks) = t.turn.as_mut().filter(|m| m.id == id) else {
                return;
            };
            marks.llm_at = Some(now);
            t.current.llm_latency_ms = millis(now, marks.final_at);
            t.current.tokens_generated = tokens;
        });
    }

    /// One chunk reached the sink. The first one closes the latency window.
    pub fn chunk_forwarded(&self, id: u64) {
        let now = Instant::now();
        self.with(|t| {
            let Some(marks) = t.turn.as_mut().filter(|m| m.id == id) else {
                return;
            };
            if marks.first_chunk_at.is_none() {
                marks.first_chunk_at = Some(now);
                let synth_from = marks.llm_at.unwrap_or(marks.final_at);
                t.current.tts_latency_ms = millis(now, synth_from);
                t.current.total_latency_ms = millis(now, marks.final_at);
            }
            t.current.audio_chunks += 1;
        });
    }

    pub fn turn_finished(&self, id: u64, interrupted: bool) {
        let now = Instant::now();
        self.with(|t| {
            let Some(marks) = t.turn.as_ref().filter(|m| m.id == id) else {
                return;
            };
            t.current.turn_duration_ms = millis(now, marks.final_at);
            t.current.interrupted = interrupted;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn latencies_follow_turn_milestones() {
        let metrics = MetricsCollector::new();
        metrics.audio_received();
        tokio::time::advance(Duration::from_millis(120)).await;
        metrics.turn_started(1);
        tokio::time::advance(Duration::from_millis(300)).await;
        metrics.llm_responded(1, 8);
        tokio::time::advance(Duration::from_millis(80)).await;
        metrics.chunk_forwarded(1);
        tokio::time::advance(Duration::from_millis(100)).await;
        metrics.chunk_forwarded(1);
        metrics.turn_finished(1, false);

        let snap = metrics.snapshot();
        assert_eq!(snap.turn_id, 1);
        assert_eq!(snap.stt_latency_ms, 120);
        assert_eq!(snap.llm_latency_ms, 300);
        assert_eq!(snap.tts_latency_ms, 80);
        assert_eq!(snap.total_latency_ms, 380);
        assert_eq!(snap.turn_duration_ms, 480);
        assert_eq!(snap.tokens_generated, 8);
        assert_eq!(snap.audio_chunks, 2);
        assert!(!snap.interrupted);
    }

    #[tokio::test(start_paused = true)]
    async fn new_turn_resets_snapshot() {
        let metrics = MetricsCollector::new();
        metrics.turn_started(1);
        metrics.llm_responded(1, 5);
        metrics.chunk_forwarded(1);
        metrics.turn_finished(1, true);
        assert!(metrics.snapshot().interrupted);

        metrics.turn_started(2);
        let snap = metrics.snapshot();
        assert_eq!(snap.turn_id, 2);
        assert_eq!(snap.tokens_generated, 0);
        assert_eq!(snap.audio_chunks, 0);
        assert!(!snap.interrupted);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_turn_reports_are_ignored() {
        let metrics = MetricsCollector::new();
        metrics.turn_started(1);
        metrics.turn_started(2);
        metrics.llm_responded(1, 99);
        metrics.chunk_forwarded(1);
        metrics.turn_finished(1, true);
        let snap = metrics.snapshot();
        assert_eq!(snap.tokens_generated, 0);
        assert_eq!(snap.audio_chunks, 0);
        assert!(!snap.interrupted);
    }
}
