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

//! Transport and device discovery contracts.
//!
//! The engine only consumes these traits. [`LoopbackTransport`] is an
//! in-memory implementation for tests and demos, [`TcpTransport`] talks to
//! a serial-over-TCP bridge.

mod loopback;
mod tcp;

pub use loopback::{LoopbackTransport, Responder};
pub use tcp::TcpTransport;

use std::sync::Arc;

use crate::error::Result;

/// Notification run by the transport when new bytes can be read.
pub type DataReceived = Arc<dyn Fn() + Send + Sync>;

/// Byte stream to the remote device.
pub trait Transport: Send + Sync {
    /// Open the link. Returns whether the link is now open.
    fn connect(&self) -> bool;

    /// Close the link. Returns whether the link was open.
    fn disconnect(&self) -> bool;

    fn is_connected(&self) -> bool;

    /// Everything received since the previous call. Never blocks.
    fn read(&self) -> Vec<u8>;

    fn write(&self, buffer: &[u8]) -> Result<()>;

    /// Register the data-arrived notification, replacing any earlier one.
    fn set_data_received(&self, callback: DataReceived);
}

/// A device the transport can be pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub address: String,
    pub name: String,
    pub paired: bool,
}

/// Device enumeration and pairing, as offered by the platform.
pub trait DeviceDiscovery: Send + Sync {
    /// Devices already paired with this host.
    fn paired_devices(&self) -> Vec<DeviceInfo>;

    /// Devices currently in range, paired or not.
    fn discover_devices(&self) -> Vec<DeviceInfo>;

    /// Pair with `address` using `pin`. Returns whether pairing succeeded.
    fn pair(&self, address: &str, pin: &str) -> bool;

    /// Point the transport at `address` for the next connect.
    fn select_device(&self, address: &str) -> bool;
}
