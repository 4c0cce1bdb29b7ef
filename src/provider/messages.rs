use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};

/// Control frame telling the provider no more audio will follow
pub const CLOSE_STREAM: &str = r#"{"type":"CloseStream"}"#;

/// Message received from the provider's streaming socket
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderMessage {
    /// Transcription result (interim or final)
    Results(ResultsMessage),

    /// Stream metadata, sent once on open and again before the provider closes
    Metadata(MetadataMessage),

    SpeechStarted {},

    UtteranceEnd {},

    /// Anything else the provider may add later
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsMessage {
    pub channel: Channel,

    #[serde(default)]
    pub is_final: bool,

    #[serde(default)]
    pub speech_final: bool,

    /// Offset of this result in the stream, in seconds
    #[serde(default)]
    pub start: f64,

    #[serde(default)]
    pub duration: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Alternative {
    #[serde(default)]
    pub transcript: String,

    #[serde(default)]
    pub confidence: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataMessage {
    pub request_id: Option<String>,
    pub duration: Option<f64>,
    pub channels: Option<u32>,
}

/// A normalized piece of transcript.
///
/// Partials for a segment supersede each other until a final for the same
/// `segment` closes it; the next fragment then belongs to `segment + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptFragment {
    pub text: String,
    pub is_final: bool,
    pub confidence: f32,
    pub segment: u64,
    pub start_secs: f64,
    pub duration_secs: f64,
}

/// Result of decoding one inbound text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Best alternative of a `Results` message. `text` may be empty.
    Transcript {
        text: String,
        is_final: bool,
        confidence: f32,
        start_secs: f64,
        duration_secs: f64,
    },

    /// Metadata or other control message, nothing to relay
    Control,
}

/// Decode one provider text frame.
///
/// Malformed JSON and `Results` messages without `channel.alternatives` are
/// protocol errors; the caller reports them and keeps the session open. An
/// empty alternatives list decodes as an empty transcript.
pub fn decode(raw: &str) -> Result<Decoded> {
    let message: ProviderMessage =
        serde_json::from_str(raw).map_err(|e| RelayError::Protocol(e.to_string()))?;

    match message {
        ProviderMessage::Results(results) => {
            let best = results
                .channel
                .alternatives
                .into_iter()
                .next()
                .unwrap_or_default();

            Ok(Decoded::Transcript {
                text: best.transcript,
                is_final: results.is_final,
                confidence: best.confidence,
                start_secs: results.start,
                duration_secs: results.duration,
            })
        }
        ProviderMessage::Metadata(_)
        | ProviderMessage::SpeechStarted {}
        | ProviderMessage::UtteranceEnd {}
        | ProviderMessage::Unknown => Ok(Decoded::Control),
    }
}
