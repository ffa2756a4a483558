// src/config.rs
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RelaySettings {
    pub base_url: String,
    pub endpoint: String,
    pub debug: bool,
    pub auto_connect: bool,
    pub reconnect: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackoffSettings {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportSettings {
    /// Reconnection time used by the transport itself until the server sends `retry:`.
    pub retry_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relay: RelaySettings,
    pub backoff: BackoffSettings,
    pub transport: TransportSettings,
}

impl Settings {
    /// Load the config from `Settings.toml` plus optional environment overrides.
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Self::defaults()?
            // 1) Read the file-based config if there is one
            .add_source(File::new("Settings", FileFormat::Toml).required(false))
            // 2) Then environment, e.g. RELAY__BASE_URL
            .add_source(config::Environment::default().separator("__"));

        builder.build()?.try_deserialize()
    }

    /// Load the config from a TOML string layered over the defaults.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("relay.base_url", "http://127.0.0.1:8000")?
            .set_default("relay.endpoint", crate::connection::DEFAULT_ENDPOINT)?
            .set_default("relay.debug", false)?
            .set_default("relay.auto_connect", true)?
            .set_default("relay.reconnect", true)?
            .set_default("backoff.initial_ms", 1000)?
            .set_default("backoff.max_ms", 64000)?
            .set_default("backoff.multiplier", 2.0)?
            .set_default("transport.retry_ms", 3000)
    }
}
