pub mod analyze;
pub mod buffer;
pub mod capture;
pub mod device;
pub mod pcm;
pub mod playback;
pub mod resample;

use tokio::sync::{mpsc, oneshot};

use crate::error::Result;

/// Rate of outbound microphone audio on the wire.
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Rate of synthesized speech sent by the server.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// What the capture side asks the device layer for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub device: Option<String>,
    pub channels: u16,
    pub block_size: usize,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

/// The device a stream actually opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// A running microphone stream. Dropping it releases the device.
pub trait CaptureStream {
    fn info(&self) -> &DeviceInfo;

    /// Enable or disable the track. A disabled track delivers silence.
    fn set_enabled(&self, enabled: bool);

    /// Release the device. Must be idempotent.
    fn stop(&mut self);
}

/// An open capture stream plus its feed of fixed-size mono blocks at the
/// device's native rate.
pub struct CaptureHandle {
    pub stream: Box<dyn CaptureStream>,
    pub blocks: mpsc::Receiver<Vec<f32>>,
}

/// A playback device that sounds one buffer at a time.
pub trait PlaybackOutput {
    /// Start sounding `samples` (mono, at the rate the output was opened
    /// with). The receiver resolves, or errors if the sender is dropped,
    /// once playback of this buffer has ended.
    ///
    /// `ends_run` is set when nothing is queued behind this buffer. An
    /// output that holds samples back across calls must release all of
    /// them then.
    fn schedule(&mut self, samples: Vec<f32>, ends_run: bool) -> Result<oneshot::Receiver<()>>;

    /// Silence whatever is playing right now.
    fn stop(&mut self);
}

/// Access to the host's audio I/O.
pub trait AudioGateway {
    fn open_capture(&self, request: &CaptureRequest) -> Result<CaptureHandle>;

    fn open_playback(&self, sample_rate: u32) -> Result<Box<dyn PlaybackOutput>>;
}
