use std::borrow::Cow;

use audioadapter_buffers::direct::SequentialSliceOfVecs;
use rubato::audioadapter::Adapter;
use rubato::{Fft, FixedSync, Resampler as RubatoResampler};

use crate::error::{IntakeError, Result};

/// Block-averaging decimator.
///
/// Each output sample is the mean of the input span it covers, with span
/// boundaries taken from the rounded cumulative ratio. There is no
/// anti-aliasing filter, so content above the target Nyquist folds back.
/// An empty span (only possible when `target_rate > source_rate`) holds the
/// nearest input sample.
#[must_use]
pub fn downsample(buffer: &[f32], source_rate: u32, target_rate: u32) -> Cow<'_, [f32]> {
    if source_rate == target_rate || buffer.is_empty() {
        return Cow::Borrowed(buffer);
    }

    let ratio = f64::from(source_rate) / f64::from(target_rate);
    let out_len = (buffer.len() as f64 / ratio).round() as usize;
    let mut output = Vec::with_capacity(out_len);

    let mut offset = 0usize;
    for i in 0..out_len {
        let next = (((i + 1) as f64) * ratio).round() as usize;
        let end = next.min(buffer.len());
        let sample = if offset < end {
            let span = &buffer[offset..end];
            span.iter().sum::<f32>() / span.len() as f32
        } else {
            buffer[offset.min(buffer.len() - 1)]
        };
        output.push(sample);
        offset = next;
    }

    Cow::Owned(output)
}

/// Average interleaved frames down to one channel.
#[must_use]
pub fn mix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    let ch = channels as usize;
    interleaved
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Streaming FFT resampler for mono audio, used to bring synthesized speech
/// up to the output device's native rate.
///
/// Input is carried across [`Resampler::push`] calls and only whole blocks
/// go through the filter, so consecutive chunks join without a seam. The
/// filter's output delay is dropped once at the start of a run, and
/// [`Resampler::finish`] releases the held tail so that a run's output is
/// exactly `round(input * target / source)` frames long.
pub struct Resampler {
    inner: Option<Fft<f32>>,
    source_rate: u32,
    target_rate: u32,
    input_buf: Vec<f32>,
    skip: usize,
    consumed: usize,
    emitted: usize,
}

fn build(source_rate: u32, target_rate: u32) -> Result<Fft<f32>> {
    let chunk_size = 1024;

    Fft::new(
        source_rate as usize,
        target_rate as usize,
        chunk_size,
        2, // sub_chunks
        1,
        FixedSync::Input,
    )
    .map_err(|e| IntakeError::Resample(format!("failed to create resampler: {e}")))
}

/// Run one full input block through the filter.
fn run_block(resampler: &mut Fft<f32>, block: Vec<f32>) -> Result<Vec<f32>> {
    let frames = block.len();
    let input_data = vec![block];
    let input_buf = SequentialSliceOfVecs::new(&input_data, 1, frames)
        .map_err(|e| IntakeError::Resample(format!("buffer error: {e}")))?;
    let result = resampler
        .process(&input_buf, 0, None)
        .map_err(|e| IntakeError::Resample(format!("resample error: {e}")))?;

    Ok((0..result.frames())
        .map(|frame| result.read_sample(0, frame).unwrap_or(0.0))
        .collect())
}

/// Drop leading delay frames, counting them off `skip`.
fn skip_delay(mut output: Vec<f32>, skip: &mut usize) -> Vec<f32> {
    let dropped = (*skip).min(output.len());
    output.drain(..dropped);
    *skip -= dropped;
    output
}

impl Resampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Result<Self> {
        let inner = if source_rate == target_rate {
            None
        } else {
            Some(build(source_rate, target_rate)?)
        };
        let skip = inner.as_ref().map_or(0, |r| r.output_delay());

        Ok(Self {
            inner,
            source_rate,
            target_rate,
            input_buf: Vec::new(),
            skip,
            consumed: 0,
            emitted: 0,
        })
    }

    /// Feed the next piece of the stream and return whatever output is
    /// ready. Up to one block plus the filter delay stays held back.
    pub fn push(&mut self, mono: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(mono.to_vec());
        };

        self.input_buf.extend_from_slice(mono);
        self.consumed += mono.len();

        let mut output = Vec::new();
        let frames_needed = resampler.input_frames_next();
        while self.input_buf.len() >= frames_needed {
            let block: Vec<f32> = self.input_buf.drain(..frames_needed).collect();
            let raw = run_block(resampler, block)?;
            output.extend(skip_delay(raw, &mut self.skip));
        }

        self.emitted += output.len();
        Ok(output)
    }

    /// End the run: flush the held input through the filter with trailing
    /// silence and return the rest of the output. The next push starts a
    /// fresh run.
    pub fn finish(&mut self) -> Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(Vec::new());
        };

        let expected = (self.consumed as f64 * f64::from(self.target_rate)
            / f64::from(self.source_rate))
        .round() as usize;
        let remaining = expected.saturating_sub(self.emitted);

        let mut tail = Vec::with_capacity(remaining);
        while tail.len() < remaining {
            let frames_needed = resampler.input_frames_next();
            let take = self.input_buf.len().min(frames_needed);
            let mut block: Vec<f32> = self.input_buf.drain(..take).collect();
            block.resize(frames_needed, 0.0);
            let raw = run_block(resampler, block)?;
            tail.extend(skip_delay(raw, &mut self.skip));
        }
        tail.truncate(remaining);

        self.reset()?;
        Ok(tail)
    }

    /// Discard held input and filter state.
    pub fn reset(&mut self) -> Result<()> {
        if self.inner.is_some() {
            let fresh = build(self.source_rate, self.target_rate)?;
            self.skip = fresh.output_delay();
            self.inner = Some(fresh);
        }
        self.input_buf.clear();
        self.consumed = 0;
        self.emitted = 0;
        Ok(())
    }
}
