// src/config.rs
use config::{Config, ConfigError, Environment, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::connection::{Timings, endpoint_url};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8081";
pub const DEFAULT_ENDPOINT_PATH: &str = "/ws";

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointSettings {
    /// Base URL of the HTTP API; the socket lives on the same host.
    pub api_base_url: String,
    pub path: String,
    /// Full socket URL, bypassing the derivation from `api_base_url`.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectSettings {
    pub floor_ms: u64,
    pub ceiling_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatSettings {
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub endpoint: EndpointSettings,
    pub reconnect: ReconnectSettings,
    pub heartbeat: HeartbeatSettings,
}

impl Settings {
    /// Load the config from an optional `Settings.toml` plus environment
    /// overrides such as `RECONNECT__FLOOR_MS`.
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Self::with_defaults()?
            .add_source(File::new("Settings", FileFormat::Toml).required(false))
            .add_source(Environment::default().separator("__").try_parsing(true));

        builder.build()?.try_deserialize()
    }

    /// Load from TOML text on top of the defaults. Used by tests and tools.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Self::with_defaults()?
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    fn with_defaults() -> Result<config::ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("endpoint.api_base_url", DEFAULT_API_BASE_URL)?
            .set_default("endpoint.path", DEFAULT_ENDPOINT_PATH)?
            .set_default("reconnect.floor_ms", 1000_i64)?
            .set_default("reconnect.ceiling_ms", 30_000_i64)?
            .set_default("heartbeat.interval_ms", 30_000_i64)
    }

    pub fn timings(&self) -> Timings {
        Timings {
            reconnect_floor: Duration::from_millis(self.reconnect.floor_ms),
            reconnect_ceiling: Duration::from_millis(self.reconnect.ceiling_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat.interval_ms),
        }
    }

    pub fn endpoint_url(&self) -> anyhow::Result<Url> {
        match &self.endpoint.url {
            Some(url) => Ok(Url::parse(url)?),
            None => endpoint_url(&self.endpoint.api_base_url, &self.endpoint.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_toml("").unwrap();

        assert_eq!(settings.timings(), Timings::default());
        assert_eq!(settings.endpoint_url().unwrap().as_str(), "ws://localhost:8081/ws");
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::from_toml(
            r#"
            [endpoint]
            api_base_url = "https://events.example.com"

            [reconnect]
            floor_ms = 50
            ceiling_ms = 400

            [heartbeat]
            interval_ms = 100
            "#,
        )
        .unwrap();

        assert_eq!(
            settings.timings(),
            Timings {
                reconnect_floor: Duration::from_millis(50),
                reconnect_ceiling: Duration::from_millis(400),
                heartbeat_interval: Duration::from_millis(100),
            }
        );
        assert_eq!(settings.endpoint_url().unwrap().as_str(), "wss://events.example.com/ws");
    }

    #[test]
    fn test_explicit_url_wins() {
        let settings = Settings::from_toml(
            r#"
            [endpoint]
            url = "ws://10.0.0.5:9000/live"
            "#,
        )
        .unwrap();

        assert_eq!(settings.endpoint_url().unwrap().as_str(), "ws://10.0.0.5:9000/live");
    }
}
