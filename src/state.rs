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

//! Connection state shared between the connection manager and its readers.

use parking_lot::RwLock;

/// What the connection manager's worker does on each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Wait,
    Scan,
    Connect,
    Watchdog,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Wait => "wait",
            Mode::Scan => "scan",
            Mode::Connect => "connect",
            Mode::Watchdog => "watchdog",
        }
    }
}

/// Externally visible connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    Watchdog,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Scanning => "Scanning...",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Connected => "Connected",
            ConnectionState::Watchdog => "Connected (watchdog)",
        }
    }
}

/// Mode, connected flag and device of one connection manager.
///
/// Written by the manager's worker; other threads only read.
#[derive(Debug, Default)]
pub struct LinkState {
    mode: RwLock<Mode>,
    connected: RwLock<bool>,
    device_address: RwLock<Option<String>>,
}

impl LinkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Mode {
        *self.mode.read()
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.write() = mode;
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.read()
    }

    pub fn set_connected(&self, address: String) {
        *self.connected.write() = true;
        *self.device_address.write() = Some(address);
    }

    pub fn set_disconnected(&self) {
        *self.connected.write() = false;
        *self.device_address.write() = None;
    }

    pub fn device_address(&self) -> Option<String> {
        self.device_address.read().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        match (self.is_connected(), self.mode()) {
            (true, Mode::Watchdog) => ConnectionState::Watchdog,
            (true, _) => ConnectionState::Connected,
            (false, Mode::Scan) => ConnectionState::Scanning,
            (false, Mode::Connect) => ConnectionState::Connecting,
            (false, _) => ConnectionState::Disconnected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_follows_mode() {
        let link = LinkState::new();
        assert_eq!(link.connection_state(), ConnectionState::Disconnected);

        link.set_mode(Mode::Scan);
        assert_eq!(link.connection_state(), ConnectionState::Scanning);

        link.set_connected("00:11:22:33:44:55".to_string());
        link.set_mode(Mode::Watchdog);
        assert_eq!(link.connection_state(), ConnectionState::Watchdog);
        assert_eq!(link.device_address().as_deref(), Some("00:11:22:33:44:55"));

        link.set_disconnected();
        link.set_mode(Mode::Connect);
        assert_eq!(link.connection_state(), ConnectionState::Connecting);
        assert_eq!(link.device_address(), None);
    }
}
