//! Per-connection relay between a client and a provider session
//!
//! This module provides the `SessionRelay` abstraction that manages:
//! - Client commands (start, audio, stop, disconnect)
//! - Ready-gating of early audio
//! - Translation of provider events into client events
//! - Transcript collection and relay statistics

mod config;
mod protocol;
mod relay;
mod stats;

pub use config::{EarlyAudioPolicy, RelaySettings};
pub use protocol::{
    parse_command, ClientMessage, ErrorPayload, ServerEvent, StartOptions, TranscriptPayload,
};
pub use relay::SessionRelay;
pub use stats::{RelayShared, RelaySnapshot, TranscriptLog, TranscriptSegment};
