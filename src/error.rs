use std::io;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("unsupported audio capability: {0}")]
    UnsupportedCapability(String),

    #[error("connection timed out after {}ms", .0.as_millis())]
    ConnectTimeout(Duration),

    #[error("server did not acknowledge the audio config within {}ms", .0.as_millis())]
    HandshakeTimeout(Duration),

    #[error("connection closed abnormally (code {code}): {reason}")]
    AbnormalClose { code: u16, reason: String },

    #[error("channel error: {0}")]
    Channel(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("session stopped before streaming began")]
    Stopped,

    #[error("session controller is no longer running")]
    ControllerGone,

    #[error("audio error: {0}")]
    Audio(String),

    #[error("resample error: {0}")]
    Resample(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

impl IntakeError {
    /// A direct explanation for the person at the microphone.
    #[must_use]
    pub fn explain(&self) -> String {
        match self {
            Self::PermissionDenied(_) => {
                "Microphone permission was denied. Allow microphone access and try again."
                    .to_string()
            }
            Self::DeviceNotFound(_) => {
                "No microphone detected. Check your audio devices.".to_string()
            }
            Self::UnsupportedCapability(detail) => {
                format!("Your audio setup doesn't support the required features ({detail}).")
            }
            Self::ConnectTimeout(_)
            | Self::HandshakeTimeout(_)
            | Self::AbnormalClose { .. }
            | Self::Channel(_) => {
                format!("Could not talk to the voice server: {self}. Check that it is running.")
            }
            other => format!("Failed to start the voice session: {other}"),
        }
    }

    /// Whether the failure came from acquiring an audio device.
    #[must_use]
    pub const fn is_device_error(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied(_)
                | Self::DeviceNotFound(_)
                | Self::UnsupportedCapability(_)
                | Self::Audio(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, IntakeError>;
