//! Layered settings: optional TOML file, then `FLEETWATCH_*` environment
//! variables.
//!
//! ```toml
//! url = "ws://localhost:8080/telemetry"
//!
//! [channel]
//! liveness_window_ms = 60000
//! log_capacity = 500
//! ```
//!
//! Nested keys use a double underscore in the environment, e.g.
//! `FLEETWATCH_CHANNEL__LOG_CAPACITY=1000`.

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use fleetwatch_channel::ChannelConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Telemetry endpoint (`ws://`, `wss://` or `tcp://`).
    pub url: Option<String>,
    pub channel: ChannelConfig,
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("FLEETWATCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")?;

        settings.channel.validate()?;
        Ok(settings)
    }
}
