//! Client-facing message format.
//!
//! Text frames carry JSON envelopes `{"event": "<name>", "data": {...}}`;
//! binary frames are raw audio chunks.

use crate::error::RelayError;
use crate::provider::TranscriptFragment;
use serde::{Deserialize, Serialize};

/// Optional metadata sent with `start`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartOptions {
    pub title: Option<String>,
    pub language: Option<String>,
}

/// Command received from the client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Start(StartOptions),
    Audio(Vec<u8>),
    Stop,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Parse a client text frame into a command.
///
/// Audio only travels in binary frames, so `audio` is not accepted here.
pub fn parse_command(text: &str) -> Result<ClientMessage, String> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| format!("Malformed message: {}", e))?;

    match envelope.event.as_str() {
        "start" => {
            let options = if envelope.data.is_null() {
                StartOptions::default()
            } else {
                serde_json::from_value(envelope.data)
                    .map_err(|e| format!("Invalid start metadata: {}", e))?
            };
            Ok(ClientMessage::Start(options))
        }
        "stop" => Ok(ClientMessage::Stop),
        "audio" => Err("Audio must be sent as binary frames".to_string()),
        other => Err(format!("Unknown event: {}", other)),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptPayload {
    pub transcript: String,
    pub confidence: f32,
    pub is_final: bool,
    pub segment: u64,
}

impl From<&TranscriptFragment> for TranscriptPayload {
    fn from(fragment: &TranscriptFragment) -> Self {
        Self {
            transcript: fragment.text.clone(),
            confidence: fragment.confidence,
            is_final: fragment.is_final,
            segment: fragment.segment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub message: String,
    pub code: String,
}

/// Event sent to the client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Provider connection is open; audio can be streamed
    #[serde(rename = "ready")]
    Ready,

    #[serde(rename = "transcript.partial")]
    TranscriptPartial(TranscriptPayload),

    #[serde(rename = "transcript.final")]
    TranscriptFinal(TranscriptPayload),

    #[serde(rename = "error")]
    Error(ErrorPayload),

    /// Graceful stop has completed
    #[serde(rename = "stopped")]
    Stopped,

    #[serde(rename = "session.closed")]
    SessionClosed,
}

impl ServerEvent {
    pub fn transcript(fragment: &TranscriptFragment) -> Self {
        if fragment.is_final {
            ServerEvent::TranscriptFinal(fragment.into())
        } else {
            ServerEvent::TranscriptPartial(fragment.into())
        }
    }

    pub fn error(err: &RelayError) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: err.to_string(),
            code: err.code().to_string(),
        })
    }

    /// Error for a frame the gateway could not interpret
    pub fn bad_request(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
            code: "BAD_REQUEST".to_string(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Ready => "ready",
            ServerEvent::TranscriptPartial(_) => "transcript.partial",
            ServerEvent::TranscriptFinal(_) => "transcript.final",
            ServerEvent::Error(_) => "error",
            ServerEvent::Stopped => "stopped",
            ServerEvent::SessionClosed => "session.closed",
        }
    }
}
