use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::CaptureConfig;
use crate::error::Result;

use super::analyze::{SignalLevel, analyze};
use super::buffer::ChunkAccumulator;
use super::pcm::encode_pcm16;
use super::resample::downsample;
use super::{AudioGateway, CAPTURE_SAMPLE_RATE, CaptureRequest, CaptureStream, DeviceInfo};

/// Result of feeding one capture block through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub signal: SignalLevel,
    /// PCM16LE at 16kHz, ready to send as one binary frame.
    pub chunk: Option<Vec<u8>>,
}

/// Microphone → analyzer → accumulator → 16kHz PCM16 chunks.
pub struct CapturePipeline {
    stream: Box<dyn CaptureStream>,
    blocks: mpsc::Receiver<Vec<f32>>,
    accumulator: ChunkAccumulator,
    stopped: bool,
}

impl CapturePipeline {
    /// Open the microphone through `gateway`.
    ///
    /// On failure nothing stays open: the gateway either returns a live
    /// stream or releases whatever it acquired.
    pub fn start(gateway: &dyn AudioGateway, config: &CaptureConfig) -> Result<Self> {
        let request = CaptureRequest {
            device: config.device.clone(),
            channels: 1,
            block_size: config.block_size,
            echo_cancellation: config.echo_cancellation,
            noise_suppression: config.noise_suppression,
            auto_gain_control: config.auto_gain_control,
        };

        let handle = gateway.open_capture(&request)?;
        let info = handle.stream.info();
        tracing::info!(
            "microphone open: {} @ {}Hz, {} channel(s)",
            info.name,
            info.sample_rate,
            info.channels
        );

        Ok(Self {
            stream: handle.stream,
            blocks: handle.blocks,
            accumulator: ChunkAccumulator::new(config.flush_samples, config.flush_interval()),
            stopped: false,
        })
    }

    #[must_use]
    pub fn device(&self) -> &DeviceInfo {
        self.stream.info()
    }

    /// Next block from the device; `None` once the device stream is gone.
    pub async fn next_block(&mut self) -> Option<Vec<f32>> {
        self.blocks.recv().await
    }

    /// Feed one block.
    ///
    /// While `muted` the block is only analyzed: the reported level is 0
    /// and nothing is buffered or emitted.
    pub fn process(&mut self, block: &[f32], now: Instant, muted: bool) -> Processed {
        let signal = analyze(block);

        if muted {
            return Processed {
                signal: SignalLevel {
                    level: 0,
                    ..signal
                },
                chunk: None,
            };
        }

        let chunk = self.accumulator.feed(block, now).map(|samples| {
            let source_rate = self.stream.info().sample_rate;
            let resampled = downsample(&samples, source_rate, CAPTURE_SAMPLE_RATE);
            encode_pcm16(&resampled)
        });

        Processed { signal, chunk }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.stream.set_enabled(enabled);
    }

    /// Release the microphone. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.stream.stop();
        self.blocks.close();
        tracing::debug!("microphone released");
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::session::testing::FakeGateway;

    fn pipeline(gateway: &FakeGateway) -> CapturePipeline {
        CapturePipeline::start(gateway, &CaptureConfig::default())
            .unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn first_block_becomes_a_chunk() {
        let gateway = FakeGateway::new(48000);
        let mut capture = pipeline(&gateway);

        let out = capture.process(&[0.2; 512], Instant::now(), false);
        assert_eq!(out.signal.level, 100);
        assert!(out.signal.has_speech);
        // 512 samples at 48kHz → 171 at 16kHz → 342 bytes
        assert_eq!(out.chunk.map(|c| c.len()), Some(342));
    }

    #[test]
    fn muted_blocks_report_zero_and_send_nothing() {
        let gateway = FakeGateway::new(48000);
        let mut capture = pipeline(&gateway);

        let out = capture.process(&[0.2; 512], Instant::now(), true);
        assert_eq!(out.signal.level, 0);
        assert!(out.chunk.is_none());
    }

    #[test]
    fn blocks_accumulate_between_flushes() {
        let gateway = FakeGateway::new(16000);
        let mut capture = pipeline(&gateway);
        let start = Instant::now();

        assert!(capture.process(&[0.1; 512], start, false).chunk.is_some());
        let later = start + Duration::from_millis(10);
        assert!(capture.process(&[0.1; 512], later, false).chunk.is_none());
        assert!(capture.process(&[0.1; 512], later, false).chunk.is_none());
        assert!(capture.process(&[0.1; 512], later, false).chunk.is_none());
        let chunk = capture.process(&[0.1; 512], later, false).chunk;
        assert_eq!(chunk.map(|c| c.len()), Some(2048 * 2));
    }

    #[test]
    fn stop_is_idempotent_and_releases_device() {
        let gateway = FakeGateway::new(48000);
        let mut capture = pipeline(&gateway);
        capture.stop();
        capture.stop();
        assert_eq!(gateway.capture_stops(), 1);
    }

    #[test]
    fn failed_open_surfaces_typed_error() {
        let gateway = FakeGateway::new(48000);
        gateway.deny_microphone();
        let result = CapturePipeline::start(&gateway, &CaptureConfig::default());
        assert!(matches!(
            result,
            Err(crate::error::IntakeError::PermissionDenied(_))
        ));
    }
}
