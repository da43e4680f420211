use std::time::Duration;

use tokio::time::Instant;

/// Re-frames arbitrary device buffers into fixed-size blocks.
pub struct BlockSplitter {
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockSplitter {
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Feed samples and return every complete block.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut blocks = Vec::new();
        while self.pending.len() >= self.block_size {
            blocks.push(self.pending.drain(..self.block_size).collect());
        }
        blocks
    }
}

/// Collects capture blocks until they are worth sending.
///
/// A flush happens once `flush_samples` are buffered, or once
/// `flush_interval` has passed since the previous flush. The first block
/// after construction always flushes.
pub struct ChunkAccumulator {
    buffer: Vec<f32>,
    flush_samples: usize,
    flush_interval: Duration,
    last_flush: Option<Instant>,
}

impl ChunkAccumulator {
    #[must_use]
    pub fn new(flush_samples: usize, flush_interval: Duration) -> Self {
        Self {
            buffer: Vec::with_capacity(flush_samples),
            flush_samples,
            flush_interval,
            last_flush: None,
        }
    }

    /// Feed one block; returns the accumulated samples when a flush is due.
    pub fn feed(&mut self, block: &[f32], now: Instant) -> Option<Vec<f32>> {
        self.buffer.extend_from_slice(block);

        if self.buffer.is_empty() {
            return None;
        }

        let interval_elapsed = self
            .last_flush
            .is_none_or(|last| now.saturating_duration_since(last) >= self.flush_interval);

        if self.buffer.len() >= self.flush_samples || interval_elapsed {
            self.last_flush = Some(now);
            return Some(std::mem::take(&mut self.buffer));
        }

        None
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
