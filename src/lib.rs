pub mod config;
pub mod error;
pub mod http;
pub mod provider;
pub mod relay;

pub use config::Config;
pub use error::RelayError;
pub use http::{create_router, AppState};
pub use provider::{
    DeepgramConnector, ProviderConnector, ProviderEvent, ProviderSession, ProviderSettings,
    SessionState, TranscriptFragment,
};
pub use relay::{ClientMessage, EarlyAudioPolicy, RelaySettings, ServerEvent, SessionRelay};
