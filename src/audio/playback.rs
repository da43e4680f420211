use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{Instant, sleep_until};

use super::PlaybackOutput;
use super::pcm::decode_pcm16;

struct ActiveChunk {
    done: oneshot::Receiver<()>,
    deadline: Instant,
}

/// Sequential player for synthesized speech.
///
/// At most one chunk sounds at a time and chunks play in enqueue order.
/// The owner drives it: await [`PlaybackQueue::finished`], then call
/// [`PlaybackQueue::advance`].
pub struct PlaybackQueue {
    output: Box<dyn PlaybackOutput>,
    sample_rate: u32,
    fallback_margin: Duration,
    pending: VecDeque<Vec<f32>>,
    active: Option<ActiveChunk>,
}

impl PlaybackQueue {
    #[must_use]
    pub fn new(output: Box<dyn PlaybackOutput>, sample_rate: u32, fallback_margin: Duration) -> Self {
        Self {
            output,
            sample_rate,
            fallback_margin,
            pending: VecDeque::new(),
            active: None,
        }
    }

    /// Decode and queue one PCM16LE chunk, starting playback if idle.
    pub fn enqueue(&mut self, pcm16: &[u8]) {
        let samples = decode_pcm16(pcm16);
        if samples.is_empty() {
            return;
        }

        self.pending.push_back(samples);
        if self.active.is_none() {
            self.start_next();
        }
    }

    /// Resolves when the active chunk has ended, either by the device's own
    /// notice or by the fallback deadline. Never resolves while idle.
    ///
    /// Cancel-safe.
    pub async fn finished(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return std::future::pending().await;
        };

        tokio::select! {
            _ = &mut active.done => {}
            () = sleep_until(active.deadline) => {
                tracing::debug!("playback completion missed, advancing on fallback timer");
            }
        }
    }

    /// Retire the active chunk and start the next one, if any.
    pub fn advance(&mut self) {
        self.active = None;
        self.start_next();
    }

    /// Stop playback immediately and drop everything queued.
    pub fn reset(&mut self) {
        if self.active.take().is_some() {
            self.output.stop();
        }
        self.pending.clear();
    }

    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    fn start_next(&mut self) {
        while let Some(samples) = self.pending.pop_front() {
            let duration = Duration::from_secs_f64(samples.len() as f64 / f64::from(self.sample_rate));
            let ends_run = self.pending.is_empty();
            match self.output.schedule(samples, ends_run) {
                Ok(done) => {
                    self.active = Some(ActiveChunk {
                        done,
                        deadline: Instant::now() + duration + self.fallback_margin,
                    });
                    return;
                }
                Err(e) => {
                    tracing::warn!("dropping speech chunk: {e}");
                }
            }
        }
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.reset();
    }
}
