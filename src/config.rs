use crate::error::RelayError;
use crate::provider::ProviderSettings;
use crate::relay::{EarlyAudioPolicy, RelaySettings};
use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub provider: ProviderConfig,
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub environment: Environment,
    pub log_level: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub connect_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub audio_queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub early_audio: EarlyAudioPolicy,
    pub max_buffered_chunks: usize,
    pub event_buffer: usize,
}

impl Config {
    /// Load configuration from defaults, an optional file at `path`, and the environment.
    ///
    /// `RELAY__SECTION__KEY` variables override the file. The conventional
    /// `DEEPGRAM_API_KEY`, `DEEPGRAM_WS_URL`, `PORT`, `NODE_ENV` and `LOG_LEVEL`
    /// variables override everything.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("service.name", "transcribe-relay")?
            .set_default("service.environment", "development")?
            .set_default("service.log_level", "info")?
            .set_default("service.http.bind", "0.0.0.0")?
            .set_default("service.http.port", 3000)?
            .set_default("provider.connect_timeout_ms", 10_000)?
            .set_default("provider.stop_timeout_ms", 5_000)?
            .set_default("provider.audio_queue_capacity", 256)?
            .set_default("relay.early_audio", "drop")?
            .set_default("relay.max_buffered_chunks", 64)?
            .set_default("relay.event_buffer", 100)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("provider.api_key", env_var("DEEPGRAM_API_KEY"))?
            .set_override_option("provider.endpoint", env_var("DEEPGRAM_WS_URL"))?
            .set_override_option("service.http.port", env_var("PORT"))?
            .set_override_option("service.environment", env_var("NODE_ENV"))?
            .set_override_option("service.log_level", env_var("LOG_LEVEL"))?
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn is_production(&self) -> bool {
        self.service.environment == Environment::Production
    }

    /// Check that the provider credentials are present.
    ///
    /// Callers decide whether a failure is fatal (production) or a degraded start (development).
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.provider.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(RelayError::Configuration(
                "DEEPGRAM_API_KEY is not configured".to_string(),
            ));
        }
        if self.provider.endpoint.as_deref().map_or(true, str::is_empty) {
            return Err(RelayError::Configuration(
                "DEEPGRAM_WS_URL is not configured".to_string(),
            ));
        }
        Ok(())
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            connect_timeout: Duration::from_millis(self.provider.connect_timeout_ms),
            stop_timeout: Duration::from_millis(self.provider.stop_timeout_ms),
            audio_queue_capacity: self.provider.audio_queue_capacity.max(1),
        }
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            early_audio: self.relay.early_audio,
            max_buffered_chunks: self.relay.max_buffered_chunks,
            event_buffer: self.relay.event_buffer.max(1),
            provider: self.provider_settings(),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
