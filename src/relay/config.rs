use crate::provider::ProviderSettings;
use serde::{Deserialize, Serialize};

/// What the relay does with audio that arrives before the provider is ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EarlyAudioPolicy {
    /// Discard the chunk and log a warning
    #[default]
    Drop,
    /// Queue up to `max_buffered_chunks` and flush in order on ready.
    /// When the queue is full the oldest chunk is discarded.
    Buffer,
}

/// Configuration for one client relay
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub early_audio: EarlyAudioPolicy,

    /// Upper bound on the early-audio queue (`Buffer` policy only)
    pub max_buffered_chunks: usize,

    /// Capacity of the event channels (provider -> relay, relay -> client)
    pub event_buffer: usize,

    pub provider: ProviderSettings,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            early_audio: EarlyAudioPolicy::Drop,
            max_buffered_chunks: 64,
            event_buffer: 100,
            provider: ProviderSettings::default(),
        }
    }
}
