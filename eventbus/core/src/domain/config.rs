// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Configuration
//
// Defines the YAML configuration consumed by the aggregator:
// - Designated event command name routed through forward-and-merge
// - Merge strategy for partial results
// - Optional pending timeout for streams that never send a final result
// - Event bus buffer capacity
//
// Discovery order: --config flag, EVENTBUS_CONFIG_PATH, ./eventbus-config.yaml,
// ~/.eventbus/config.yaml, then built-in defaults.

use crate::domain::accumulator::MergeStrategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "EVENTBUS_CONFIG_PATH";
pub const EVENT_COMMAND_ENV: &str = "EVENTBUS_EVENT_COMMAND";
pub const PENDING_TIMEOUT_ENV: &str = "EVENTBUS_PENDING_TIMEOUT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Command name handled by forward-and-merge; every other name is rejected
    #[serde(default = "default_event_command_name")]
    pub event_command_name: String,

    /// How partial results are folded together
    #[serde(default)]
    pub merge_strategy: MergeStrategy,

    /// Reply with merged-so-far data if no final result arrives in time.
    /// Unset means a request without a final result stays pending.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub pending_timeout: Option<Duration>,

    /// Events buffered per subscriber before old ones are dropped
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

fn default_event_command_name() -> String {
    "ten_event".to_string()
}

fn default_event_bus_capacity() -> usize {
    1000
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            event_command_name: default_event_command_name(),
            merge_strategy: MergeStrategy::default(),
            pending_timeout: None,
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

impl EventBusConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Find a config file in the standard locations
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            tracing::warn!("{} points to missing file: {:?}", CONFIG_PATH_ENV, path);
        }

        let cwd = PathBuf::from("./eventbus-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".eventbus").join("config.yaml");
            if home_config.exists() {
                return Some(home_config);
            }
        }

        None
    }

    /// Load from an explicit path, else discovery, else defaults.
    /// Environment overrides are applied in every case.
    pub fn load_or_default(cli_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = match cli_path.or_else(Self::discover_config) {
            Some(path) => {
                tracing::info!("Loading configuration from {:?}", path);
                Self::from_yaml_file(&path)?
            }
            None => {
                tracing::debug!("No configuration file found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(name) = lookup(EVENT_COMMAND_ENV) {
            tracing::info!("Environment override: {}={}", EVENT_COMMAND_ENV, name);
            self.event_command_name = name;
        }

        if let Some(raw) = lookup(PENDING_TIMEOUT_ENV) {
            match raw.trim() {
                "" | "none" | "off" => {
                    tracing::info!("Environment override: {}=off", PENDING_TIMEOUT_ENV);
                    self.pending_timeout = None;
                }
                value => match humantime::parse_duration(value) {
                    Ok(timeout) => {
                        tracing::info!("Environment override: {}={}", PENDING_TIMEOUT_ENV, value);
                        self.pending_timeout = Some(timeout);
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Invalid value for {}: '{}' ({}). Ignoring.",
                            PENDING_TIMEOUT_ENV,
                            value,
                            e
                        );
                    }
                },
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_command_name.trim().is_empty() {
            return Err(ConfigError::Invalid("event_command_name cannot be empty".to_string()));
        }

        if self.event_bus_capacity == 0 {
            return Err(ConfigError::Invalid("event_bus_capacity must be greater than zero".to_string()));
        }

        if self.pending_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid(
                "pending_timeout must be greater than zero (omit it to wait forever)".to_string(),
            ));
        }

        Ok(())
    }
}
