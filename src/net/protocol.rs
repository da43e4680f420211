use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::audio::CAPTURE_SAMPLE_RATE;
use crate::error::{IntakeError, Result};

/// Control messages the client sends as JSON text frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Config {
        sample_rate: u32,
        channels: u16,
        encoding: String,
    },
    EndOfAudio,
}

impl ClientMessage {
    /// The handshake declaring the outbound audio format.
    #[must_use]
    pub fn handshake() -> Self {
        Self::Config {
            sample_rate: CAPTURE_SAMPLE_RATE,
            channels: 1,
            encoding: "linear16".to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| IntakeError::Other(format!("failed to encode client message: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Assistant,
    #[default]
    #[serde(other)]
    User,
}

/// Control messages the server sends as JSON text frames.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConfigAck,
    Transcript {
        #[serde(default)]
        text: String,
        #[serde(default)]
        is_final: bool,
    },
    ChatMessage {
        #[serde(default)]
        text: String,
        #[serde(default)]
        role: Role,
    },
    TtsStart,
    TtsEnd,
    FieldExtracted {
        field: String,
        value: Value,
    },
    FieldConfirmed {
        field: String,
        value: Value,
    },
    FieldPending {
        field: String,
        value: Value,
    },
    ExtractedFields {
        data: Map<String, Value>,
    },
    LoanCalculations {
        data: Map<String, Value>,
    },
    EmailStatus {
        #[serde(default)]
        status: String,
        #[serde(default)]
        to: String,
    },
    Info {
        #[serde(default)]
        message: String,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| IntakeError::MalformedMessage(e.to_string()))
    }

    /// Wire name, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConfigAck => "config_ack",
            Self::Transcript { .. } => "transcript",
            Self::ChatMessage { .. } => "chat_message",
            Self::TtsStart => "tts_start",
            Self::TtsEnd => "tts_end",
            Self::FieldExtracted { .. } => "field_extracted",
            Self::FieldConfirmed { .. } => "field_confirmed",
            Self::FieldPending { .. } => "field_pending",
            Self::ExtractedFields { .. } => "extracted_fields",
            Self::LoanCalculations { .. } => "loan_calculations",
            Self::EmailStatus { .. } => "email_status",
            Self::Info { .. } => "info",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ServerMessage {
        ServerMessage::parse(text).unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn handshake_wire_format() {
        let json = ClientMessage::handshake()
            .to_json()
            .unwrap_or_else(|e| panic!("{e}"));
        let value: Value = serde_json::from_str(&json).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(value["type"], "config");
        assert_eq!(value["sample_rate"], 16000);
        assert_eq!(value["channels"], 1);
        assert_eq!(value["encoding"], "linear16");
    }

    #[test]
    fn end_of_audio_wire_format() {
        let json = ClientMessage::EndOfAudio
            .to_json()
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(json, r#"{"type":"end_of_audio"}"#);
    }

    #[test]
    fn parses_control_messages() {
        assert_eq!(parse(r#"{"type":"config_ack"}"#), ServerMessage::ConfigAck);
        assert_eq!(parse(r#"{"type":"tts_start"}"#), ServerMessage::TtsStart);
        assert_eq!(
            parse(r#"{"type":"transcript","text":"hello","is_final":true}"#),
            ServerMessage::Transcript {
                text: "hello".to_string(),
                is_final: true
            }
        );
        assert_eq!(
            parse(r#"{"type":"chat_message","text":"Hi there","role":"assistant"}"#),
            ServerMessage::ChatMessage {
                text: "Hi there".to_string(),
                role: Role::Assistant
            }
        );
    }

    #[test]
    fn unknown_roles_are_user() {
        assert_eq!(
            parse(r#"{"type":"chat_message","text":"x","role":"system"}"#),
            ServerMessage::ChatMessage {
                text: "x".to_string(),
                role: Role::User
            }
        );
        assert_eq!(
            parse(r#"{"type":"chat_message","text":"x"}"#),
            ServerMessage::ChatMessage {
                text: "x".to_string(),
                role: Role::User
            }
        );
    }

    #[test]
    fn parses_field_updates() {
        let msg = parse(r#"{"type":"field_confirmed","field":"income","value":85000}"#);
        let ServerMessage::FieldConfirmed { field, value } = msg else {
            panic!("unexpected message: {msg:?}");
        };
        assert_eq!(field, "income");
        assert_eq!(value, Value::from(85000));

        let msg = parse(r#"{"type":"loan_calculations","data":{"emi":1234.5,"eligible":true}}"#);
        let ServerMessage::LoanCalculations { data } = msg else {
            panic!("unexpected message: {msg:?}");
        };
        assert_eq!(data["eligible"], Value::Bool(true));
    }

    #[test]
    fn unknown_type_is_tolerated() {
        assert_eq!(
            parse(r#"{"type":"session.updated","x":1}"#),
            ServerMessage::Unknown
        );
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            ServerMessage::parse("not json"),
            Err(IntakeError::MalformedMessage(_))
        ));
        assert!(matches!(
            ServerMessage::parse(r#"{"type":"field_extracted"}"#),
            Err(IntakeError::MalformedMessage(_))
        ));
    }
}
