//! Provider-facing side of the relay
//!
//! - `connector`: opens the streaming socket to the speech-to-text provider
//! - `messages`: provider wire format and decoding into transcript fragments
//! - `session`: one provider connection as an explicit state machine with a typed event stream

pub mod connector;
pub mod messages;
pub mod session;

pub use connector::{DeepgramConnector, InboundFrame, OutboundFrame, ProviderConnector, ProviderLink};
pub use messages::{decode, Decoded, ProviderMessage, TranscriptFragment, CLOSE_STREAM};
pub use session::{CloseReason, ProviderEvent, ProviderSession, ProviderSettings, SessionState};
