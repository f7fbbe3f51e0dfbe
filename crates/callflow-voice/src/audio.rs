//! Audio buffers and PCM helpers shared by the adapters.
//!
//! Audio is treated as opaque bytes in the transport's sample format. The
//! helpers here assume signed 16-bit little-endian mono where they need to
//! look inside (endpointing, duration).

use crate::error::VoiceError;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::VecDeque;

/// One buffer of synthesized audio handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioChunk(Vec<u8>);

impl AudioChunk {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(data.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for AudioChunk {
    fn from(data: Vec<u8>) -> Self {
        Self(data)
    }
}

impl From<&[u8]> for AudioChunk {
    fn from(data: &[u8]) -> Self {
        Self(data.to_vec())
    }
}

impl AsRef<[u8]> for AudioChunk {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Lazy, finite, non-restartable sequence of synthesized audio.
///
/// Dropping the stream abandons the synthesis request.
pub type AudioStream = BoxStream<'static, Result<AudioChunk, VoiceError>>;

/// Normalised RMS level of s16le PCM in `[0.0, 1.0]`.
///
/// A trailing odd byte is ignored.
pub fn rms_s16le(pcm: &[u8]) -> f32 {
    let samples = pcm.len() / 2;
    if samples == 0 {
        return 0.0;
    }
    let sum_sq: f64 = pcm
        .chunks_exact(2)
        .map(|b| {
            let s = f64::from(i16::from_le_bytes([b[0], b[1]])) / f64::from(i16::MAX);
            s * s
        })
        .sum();
    (sum_sq / samples as f64).sqrt() as f32
}

/// Playback duration of s16le mono PCM.
pub fn pcm_duration_ms(bytes: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (bytes as u64 / 2) * 1000 / u64::from(sample_rate)
}

/// Splits arbitrary provider buffers into fixed-size chunks.
#[derive(Debug)]
pub struct Rechunker {
    frame_bytes: usize,
    pending: Vec<u8>,
}

impl Rechunker {
    /// `frame_bytes == 0` passes buffers through unchanged.
    pub fn new(frame_bytes: usize) -> Self {
        Self {
            frame_bytes,
            pending: Vec::new(),
        }
    }

    pub fn push(&mut self, data: &[u8]) -> Vec<AudioChunk> {
        if self.frame_bytes == 0 {
            return if data.is_empty() {
                Vec::new()
            } else {
                vec![AudioChunk::from(data)]
            };
        }

        self.pending.extend_from_slice(data);
        let mut out = Vec::with_capacity(self.pending.len() / self.frame_bytes);
        while self.pending.len() >= self.frame_bytes {
            let rest = self.pending.split_off(self.frame_bytes);
            out.push(AudioChunk::new(std::mem::replace(&mut self.pending, rest)));
        }
        out
    }

    /// Flushes the final short chunk, if any.
    pub fn finish(&mut self) -> Option<AudioChunk> {
        if self.pending.is_empty() {
            None
        } else {
            Some(AudioChunk::new(std::mem::take(&mut self.pending)))
        }
    }
}

/// Re-chunks a provider byte stream into an [`AudioStream`].
///
/// The first provider error ends the stream after being yielded.
pub fn rechunk<S, B, E>(inner: S, frame_bytes: usize) -> AudioStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + 'static,
    E: Into<VoiceError> + 'static,
{
    struct State {
        inner: BoxStream<'static, Result<Vec<u8>, VoiceError>>,
        chunker: Rechunker,
        ready: VecDeque<AudioChunk>,
        done: bool,
    }

    let state = State {
        inner: inner
            .map(|item| item.map(|b| b.as_ref().to_vec()).map_err(Into::into))
            .boxed(),
        chunker: Rechunker::new(frame_bytes),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(chunk) = st.ready.pop_front() {
                return Some((Ok(chunk), st));
            }
            if st.done {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(data)) => st.ready.extend(st.chunker.push(&data)),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.done = true;
                    st.ready.extend(st.chunker.finish());
                }
            }
        }
    })
    .boxed()
}
