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

//! Persisted connection settings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Last successful device and the pins that paired devices accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub device_address: Option<String>,
    pub device_pins: HashMap<String, String>,
    pub updated_at: Option<DateTime<Local>>,
}

impl ConnectionSettings {
    pub fn pin_for(&self, address: &str) -> Option<&str> {
        self.device_pins.get(address).map(String::as_str)
    }

    pub fn update_device_pin(&mut self, address: &str, pin: &str) {
        self.device_pins.insert(address.to_string(), pin.to_string());
        self.updated_at = Some(Local::now());
    }

    pub fn set_device_address(&mut self, address: &str) {
        self.device_address = Some(address.to_string());
        self.updated_at = Some(Local::now());
    }
}

/// Loads and stores [`ConnectionSettings`].
pub trait SettingsStorer: Send + Sync {
    fn load(&self) -> Result<ConnectionSettings>;
    fn store(&self, settings: &ConnectionSettings) -> Result<()>;
}

/// Settings kept as pretty JSON in the data directory.
pub struct JsonFileStorer {
    path: PathBuf,
}

impl JsonFileStorer {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("connection_settings.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStorer for JsonFileStorer {
    /// A missing file yields empty settings.
    fn load(&self) -> Result<ConnectionSettings> {
        if !self.path.exists() {
            return Ok(ConnectionSettings::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn store(&self, settings: &ConnectionSettings) -> Result<()> {
        let content = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, content)?;
        debug!("Stored connection settings in {}", self.path.display());
        Ok(())
    }
}

/// Settings held in memory only.
#[derive(Default)]
pub struct MemoryStorer {
    settings: Mutex<ConnectionSettings>,
}

impl MemoryStorer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStorer for MemoryStorer {
    fn load(&self) -> Result<ConnectionSettings> {
        Ok(self.settings.lock().clone())
    }

    fn store(&self, settings: &ConnectionSettings) -> Result<()> {
        *self.settings.lock() = settings.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let storer = JsonFileStorer::new(dir.path());
        assert_eq!(storer.load().unwrap(), ConnectionSettings::default());
    }

    #[test]
    fn test_store_and_reload() {
        let dir = TempDir::new().unwrap();
        let storer = JsonFileStorer::new(dir.path());

        let mut settings = ConnectionSettings::default();
        settings.set_device_address("00:06:66:4F:A1:B2");
        settings.update_device_pin("00:06:66:4F:A1:B2", "1234");
        storer.store(&settings).unwrap();

        let loaded = JsonFileStorer::new(dir.path()).load().unwrap();
        assert_eq!(loaded.device_address.as_deref(), Some("00:06:66:4F:A1:B2"));
        assert_eq!(loaded.pin_for("00:06:66:4F:A1:B2"), Some("1234"));
        assert!(loaded.updated_at.is_some());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let storer = JsonFileStorer::new(dir.path());
        std::fs::write(storer.path(), "{ not json").unwrap();
        assert!(storer.load().is_err());
    }

    #[test]
    fn test_memory_storer() {
        let storer = MemoryStorer::new();
        let mut settings = ConnectionSettings::default();
        settings.update_device_pin("AA", "0000");
        storer.store(&settings).unwrap();
        assert_eq!(storer.load().unwrap().pin_for("AA"), Some("0000"));
    }
}
