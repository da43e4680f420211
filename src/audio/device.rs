use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, Stream, StreamConfig};
use crossbeam_channel::{Receiver, Sender, bounded};
use tokio::sync::{mpsc, oneshot};

use crate::error::{IntakeError, Result};

use super::buffer::BlockSplitter;
use super::resample::{Resampler, mix_to_mono};
use super::{AudioGateway, CaptureHandle, CaptureRequest, CaptureStream, DeviceInfo, PlaybackOutput};

/// Audio gateway backed by the default cpal host.
pub struct CpalGateway {
    output_device: Option<String>,
}

impl CpalGateway {
    #[must_use]
    pub const fn new(output_device: Option<String>) -> Self {
        Self { output_device }
    }
}

impl AudioGateway for CpalGateway {
    fn open_capture(&self, request: &CaptureRequest) -> Result<CaptureHandle> {
        CpalCapture::open(request)
    }

    fn open_playback(&self, sample_rate: u32) -> Result<Box<dyn PlaybackOutput>> {
        let playback = CpalPlayback::open(self.output_device.as_deref(), sample_rate)?;
        Ok(Box::new(playback))
    }
}

fn device_name(device: &Device) -> Option<String> {
    device
        .description()
        .ok()
        .map(|desc| desc.name().to_string())
}

/// Map a cpal failure onto the error kinds the front end explains to users.
///
/// cpal reports host-specific causes as text, so classification is by
/// message.
fn classify(context: &str, message: String) -> IntakeError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed") {
        IntakeError::PermissionDenied(format!("{context}: {message}"))
    } else if lower.contains("not available") || lower.contains("no such") || lower.contains("not found") {
        IntakeError::DeviceNotFound(format!("{context}: {message}"))
    } else if lower.contains("not supported") || lower.contains("unsupported") {
        IntakeError::UnsupportedCapability(format!("{context}: {message}"))
    } else {
        IntakeError::Audio(format!("{context}: {message}"))
    }
}

fn find_input_device(host: &Host, name: Option<&str>) -> Result<Device> {
    if let Some(name) = name {
        host.input_devices()
            .map_err(|e| classify("failed to enumerate input devices", e.to_string()))?
            .find(|d| device_name(d).as_deref() == Some(name))
            .ok_or_else(|| IntakeError::DeviceNotFound(format!("input device not found: {name}")))
    } else {
        host.default_input_device().ok_or_else(|| {
            IntakeError::DeviceNotFound("no default input device available".to_string())
        })
    }
}

fn find_output_device(host: &Host, name: Option<&str>) -> Result<Device> {
    if let Some(name) = name {
        host.output_devices()
            .map_err(|e| classify("failed to enumerate output devices", e.to_string()))?
            .find(|d| device_name(d).as_deref() == Some(name))
            .ok_or_else(|| IntakeError::DeviceNotFound(format!("output device not found: {name}")))
    } else {
        host.default_output_device().ok_or_else(|| {
            IntakeError::DeviceNotFound("no default output device available".to_string())
        })
    }
}

/// Names of all input devices.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| classify("failed to enumerate input devices", e.to_string()))?;
    Ok(devices.filter_map(|d| device_name(&d)).collect())
}

/// Names of all output devices.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| classify("failed to enumerate output devices", e.to_string()))?;
    Ok(devices.filter_map(|d| device_name(&d)).collect())
}

#[must_use]
pub fn default_input_device_name() -> Option<String> {
    cpal::default_host()
        .default_input_device()
        .and_then(|d| device_name(&d))
}

#[must_use]
pub fn default_output_device_name() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|d| device_name(&d))
}

/// Microphone capture via cpal.
///
/// The device callback forwards raw buffers over a bounded channel; a
/// forwarding thread mixes to mono, cuts fixed-size blocks and hands them
/// to the session. Dropping the stream ends the thread.
struct CpalCapture {
    stream: Option<Stream>,
    info: DeviceInfo,
    enabled: Arc<AtomicBool>,
}

impl CpalCapture {
    fn open(request: &CaptureRequest) -> Result<CaptureHandle> {
        let host = cpal::default_host();
        let device = find_input_device(&host, request.device.as_deref())?;

        let supported = device
            .default_input_config()
            .map_err(|e| classify("failed to get default input config", e.to_string()))?;

        let sample_rate = supported.sample_rate();
        let channels = supported.channels();

        if request.echo_cancellation || request.noise_suppression || request.auto_gain_control {
            tracing::debug!(
                "host capture has no echo cancellation, noise suppression or gain control; using raw input"
            );
        }

        let stream_config = StreamConfig {
            channels,
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        // bounded; the audio callback must never block
        let (raw_tx, raw_rx) = bounded::<Vec<f32>>(64);
        let (block_tx, block_rx) = mpsc::channel::<Vec<f32>>(64);
        let enabled = Arc::new(AtomicBool::new(true));

        let err_fn = |err: cpal::StreamError| {
            tracing::error!("capture stream error: {err}");
        };

        let callback_enabled = Arc::clone(&enabled);
        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let buffer = if callback_enabled.load(Ordering::Relaxed) {
                        data.to_vec()
                    } else {
                        vec![0.0; data.len()]
                    };
                    let _ = raw_tx.try_send(buffer);
                },
                err_fn,
                None,
            )
            .map_err(|e| classify("failed to build input stream", e.to_string()))?;

        // On failure `stream` drops here, which releases the device.
        stream
            .play()
            .map_err(|e| classify("failed to start input stream", e.to_string()))?;

        let block_size = request.block_size;
        std::thread::spawn(move || {
            let mut splitter = BlockSplitter::new(block_size);
            while let Ok(raw) = raw_rx.recv() {
                let mono = mix_to_mono(&raw, channels);
                for block in splitter.push(&mono) {
                    if block_tx.blocking_send(block).is_err() {
                        tracing::debug!("capture receiver dropped, stopping forwarder");
                        return;
                    }
                }
            }
            tracing::debug!("capture forwarder exiting");
        });

        let info = DeviceInfo {
            name: device_name(&device).unwrap_or_else(|| "unknown".to_string()),
            sample_rate,
            channels,
        };

        Ok(CaptureHandle {
            stream: Box::new(Self {
                stream: Some(stream),
                info,
                enabled,
            }),
            blocks: block_rx,
        })
    }
}

impl CaptureStream for CpalCapture {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!("failed to pause capture stream: {e}");
            }
            drop(stream);
        }
    }
}

/// One buffer handed to the output callback.
pub(crate) struct PlaybackSlot {
    samples: Vec<f32>,
    position: usize,
    generation: u64,
    done: Option<oneshot::Sender<()>>,
}

/// The output callback's side of playback. Slots arrive over a bounded
/// channel and play back to back; a slot from before the latest stop is
/// discarded. Nothing here blocks.
pub(crate) struct PlaybackCursor {
    slots: Receiver<PlaybackSlot>,
    generation: Arc<AtomicU64>,
    current: Option<PlaybackSlot>,
}

impl PlaybackCursor {
    pub(crate) const fn new(slots: Receiver<PlaybackSlot>, generation: Arc<AtomicU64>) -> Self {
        Self {
            slots,
            generation,
            current: None,
        }
    }

    /// Fill an interleaved output buffer, duplicating mono to every channel
    /// and padding with silence when nothing is queued. Each slot signals
    /// completion once its last sample has been written.
    pub(crate) fn fill(&mut self, data: &mut [f32], channels: usize) {
        let live = self.generation.load(Ordering::Acquire);
        if self.current.as_ref().is_some_and(|slot| slot.generation != live) {
            self.current = None;
        }

        for frame in data.chunks_mut(channels.max(1)) {
            frame.fill(self.next_sample(live));
        }
    }

    fn next_sample(&mut self, live: u64) -> f32 {
        loop {
            let Some(current) = self.current.as_mut() else {
                match self.slots.try_recv() {
                    Ok(slot) if slot.generation == live => self.current = Some(slot),
                    Ok(_) => {}
                    Err(_) => return 0.0,
                }
                continue;
            };

            match current.samples.get(current.position).copied() {
                Some(sample) => {
                    current.position += 1;
                    if current.position == current.samples.len() {
                        self.complete();
                    }
                    return sample;
                }
                None => self.complete(),
            }
        }
    }

    fn complete(&mut self) {
        if let Some(mut slot) = self.current.take()
            && let Some(done) = slot.done.take()
        {
            let _ = done.send(());
        }
    }
}

/// Speaker output via cpal, converting to the device rate with rubato.
///
/// Buffers reach the callback over a bounded crossbeam channel; `stop`
/// bumps a generation counter the callback checks, so the audio thread
/// never takes a lock.
struct CpalPlayback {
    _stream: Stream,
    slots: Sender<PlaybackSlot>,
    generation: Arc<AtomicU64>,
    resampler: Resampler,
}

impl CpalPlayback {
    fn open(name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = find_output_device(&host, name)?;

        let supported = device
            .default_output_config()
            .map_err(|e| classify("failed to get default output config", e.to_string()))?;

        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(IntakeError::UnsupportedCapability(format!(
                "output device only offers {:?} samples",
                supported.sample_format()
            )));
        }

        let device_rate = supported.sample_rate();
        let channels = supported.channels();
        let stream_config = StreamConfig {
            channels,
            sample_rate: device_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let (slot_tx, slot_rx) = bounded::<PlaybackSlot>(8);
        let generation = Arc::new(AtomicU64::new(0));
        let mut cursor = PlaybackCursor::new(slot_rx, Arc::clone(&generation));
        let output_channels = channels as usize;

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    cursor.fill(data, output_channels);
                },
                |err: cpal::StreamError| tracing::error!("playback stream error: {err}"),
                None,
            )
            .map_err(|e| classify("failed to build output stream", e.to_string()))?;

        stream
            .play()
            .map_err(|e| classify("failed to start output stream", e.to_string()))?;

        tracing::info!(
            "speaker open: {} @ {device_rate}Hz, {channels} channel(s)",
            device_name(&device).unwrap_or_else(|| "unknown".to_string())
        );

        Ok(Self {
            _stream: stream,
            slots: slot_tx,
            generation,
            resampler: Resampler::new(sample_rate, device_rate)?,
        })
    }
}

impl PlaybackOutput for CpalPlayback {
    fn schedule(&mut self, samples: Vec<f32>, ends_run: bool) -> Result<oneshot::Receiver<()>> {
        let mut samples = self.resampler.push(&samples)?;
        if ends_run {
            samples.extend(self.resampler.finish()?);
        }

        let (done_tx, done_rx) = oneshot::channel();
        let slot = PlaybackSlot {
            samples,
            position: 0,
            generation: self.generation.load(Ordering::Acquire),
            done: Some(done_tx),
        };
        self.slots
            .try_send(slot)
            .map_err(|_| IntakeError::Audio("playback device is not draining its queue".to_string()))?;

        Ok(done_rx)
    }

    fn stop(&mut self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = self.resampler.reset() {
            tracing::warn!("failed to reset playback resampler: {e}");
        }
    }
}
