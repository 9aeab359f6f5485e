// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving engine settings.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::BoardType;

const APP_DIR: &str = "cmdmessenger";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for persisted connection settings.
    #[serde(skip)]
    pub data_dir: PathBuf,

    /// Wire protocol settings.
    pub messenger: MessengerConfig,

    /// Connection manager settings.
    pub connection: ConnectionConfig,

    /// Transport settings.
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessengerConfig {
    pub field_separator: char,
    pub command_separator: char,
    pub escape_character: char,

    /// Register width of the remote board.
    pub board_type: BoardType,

    /// Append CR/LF after every command sent.
    pub print_lf_cr: bool,

    /// Characters batched into one transport write.
    pub send_buffer_max_length: usize,

    /// Queued commands before producers block.
    pub max_queue_length: usize,

    /// Keep empty fields when splitting received lines.
    pub keep_empty_fields: bool,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            field_separator: ',',
            command_separator: ';',
            escape_character: '/',
            board_type: BoardType::default(),
            print_lf_cr: false,
            send_buffer_max_length: 255,
            max_queue_length: 5000,
            keep_empty_fields: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Command id used to challenge the device.
    pub identify_command_id: i32,

    /// Expected first argument of the identify reply.
    pub unique_device_id: Option<String>,

    pub watchdog_enabled: bool,
    pub watchdog_timeout_ms: u64,
    pub watchdog_retry_timeout_ms: u64,
    pub watchdog_max_tries: u32,

    /// Scan for devices; otherwise connect to `device_address` only.
    pub device_scan_enabled: bool,

    /// Remember the last device and its pin between runs.
    pub persistent_settings: bool,

    pub device_address: Option<String>,
    pub device_pin: Option<String>,

    /// Pins tried on unpaired devices after the known ones.
    pub general_pins: Vec<String>,

    pub pairing_backoff_ms: u64,
    pub identify_timeout_ms: u64,
    pub identify_tries: u32,

    /// Connection manager tick cadence.
    pub tick_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            identify_command_id: 0,
            unique_device_id: None,
            watchdog_enabled: false,
            watchdog_timeout_ms: 3000,
            watchdog_retry_timeout_ms: 1500,
            watchdog_max_tries: 3,
            device_scan_enabled: true,
            persistent_settings: false,
            device_address: None,
            device_pin: None,
            general_pins: Vec::new(),
            pairing_backoff_ms: 1000,
            identify_timeout_ms: 1000,
            identify_tries: 3,
            tick_interval_ms: 100,
        }
    }
}

impl ConnectionConfig {
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn watchdog_retry_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_retry_timeout_ms)
    }

    pub fn pairing_backoff(&self) -> Duration {
        Duration::from_millis(self.pairing_backoff_ms)
    }

    pub fn identify_timeout(&self) -> Duration {
        Duration::from_millis(self.identify_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Configured unique device id, treating an empty string as unset.
    pub fn device_id(&self) -> Option<&str> {
        self.unique_device_id.as_deref().filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Host and port of the serial bridge.
    pub address: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:2000".to_string(),
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_dir = config_dir();
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");

        let mut config: Config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            let config = Self::default();
            let content = toml::to_string_pretty(&config)?;
            std::fs::write(&config_path, content)?;
            config
        };

        config.data_dir = data_dir();
        std::fs::create_dir_all(&config.data_dir)?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        let config_path = config_dir().join("config.toml");
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;

        Ok(())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        crate::protocol::Codec::from_config(&self.messenger)?;

        if self.messenger.send_buffer_max_length == 0 {
            bail!("send_buffer_max_length must be at least 1");
        }
        if self.messenger.max_queue_length == 0 {
            bail!("max_queue_length must be at least 1");
        }
        if self.connection.watchdog_enabled && self.connection.device_id().is_none() {
            bail!(crate::error::Error::WatchdogWithoutDeviceId);
        }
        // Without scanning, connect needs a configured or a stored address.
        if !self.connection.device_scan_enabled
            && self.connection.device_address.is_none()
            && !self.connection.persistent_settings
        {
            bail!("device_address or persistent_settings is required when device scanning is disabled");
        }
        Ok(())
    }
}
