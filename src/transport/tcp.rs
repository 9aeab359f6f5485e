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

//! Serial-over-TCP bridge transport.
//!
//! Serial port servers and RFCOMM-to-TCP bridges expose the device's byte
//! stream on a TCP socket. A polling worker drains the socket and raises
//! the data-arrived notification.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{DataReceived, DeviceDiscovery, DeviceInfo, Transport};
use crate::error::{Error, Result};
use crate::queue::{Schedule, Worker};

/// Poll cadence of the reader when the socket is idle.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Socket read timeout, keeps a poll short.
const READ_TIMEOUT: Duration = Duration::from_millis(5);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

struct TcpInner {
    address: RwLock<String>,
    reader: Mutex<Option<TcpStream>>,
    writer: Mutex<Option<TcpStream>>,
    inbound: Mutex<Vec<u8>>,
    data_received: RwLock<Option<DataReceived>>,
}

impl TcpInner {
    /// Read whatever is pending. Returns whether bytes arrived.
    fn poll(&self) -> bool {
        let mut chunk = [0u8; 512];
        let mut received = 0;
        {
            let mut reader = self.reader.lock();
            let Some(stream) = reader.as_mut() else {
                return false;
            };
            loop {
                match stream.read(&mut chunk) {
                    Ok(0) => {
                        info!("Bridge closed the connection");
                        *reader = None;
                        *self.writer.lock() = None;
                        break;
                    }
                    Ok(n) => {
                        self.inbound.lock().extend_from_slice(&chunk[..n]);
                        received += n;
                    }
                    Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                        break;
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => {
                        warn!("Bridge read failed: {}", e);
                        *reader = None;
                        *self.writer.lock() = None;
                        break;
                    }
                }
            }
        }

        if received == 0 {
            return false;
        }
        debug!("Received {} bytes from bridge", received);
        let callback = self.data_received.read().clone();
        if let Some(callback) = callback {
            callback();
        }
        true
    }
}

/// Transport connected to a TCP endpoint such as `host:port`.
pub struct TcpTransport {
    inner: Arc<TcpInner>,
    poller: Worker,
}

impl TcpTransport {
    pub fn new(address: impl Into<String>) -> Self {
        let inner = Arc::new(TcpInner {
            address: RwLock::new(address.into()),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            inbound: Mutex::new(Vec::new()),
            data_received: RwLock::new(None),
        });
        let polled = inner.clone();
        let poller = Worker::new("tcp-poller", Schedule::Every(POLL_INTERVAL), move || {
            polled.poll()
        });

        Self { inner, poller }
    }

    pub fn address(&self) -> String {
        self.inner.address.read().clone()
    }

    fn open(&self) -> Result<TcpStream> {
        let address = self.address();
        let target = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Transport(format!("cannot resolve {address}")))?;
        let stream = TcpStream::connect_timeout(&target, CONNECT_TIMEOUT)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        Ok(stream)
    }
}

impl Transport for TcpTransport {
    fn connect(&self) -> bool {
        if self.is_connected() {
            return true;
        }
        let stream = match self.open().and_then(|s| Ok((s.try_clone()?, s))) {
            Ok(pair) => pair,
            Err(e) => {
                debug!("Connecting to {} failed: {}", self.address(), e);
                return false;
            }
        };

        info!("Connected to bridge at {}", self.address());
        self.inner.inbound.lock().clear();
        *self.inner.reader.lock() = Some(stream.0);
        *self.inner.writer.lock() = Some(stream.1);

        if self.poller.is_stopped() {
            if let Err(e) = self.poller.start() {
                warn!("Failed to start bridge poller: {}", e);
            }
        }
        true
    }

    fn disconnect(&self) -> bool {
        let was_connected = self.inner.writer.lock().take().is_some();
        self.inner.reader.lock().take();
        if was_connected {
            info!("Disconnected from bridge at {}", self.address());
        }
        was_connected
    }

    fn is_connected(&self) -> bool {
        self.inner.writer.lock().is_some()
    }

    fn read(&self) -> Vec<u8> {
        std::mem::take(&mut *self.inner.inbound.lock())
    }

    fn write(&self, buffer: &[u8]) -> Result<()> {
        let mut writer = self.inner.writer.lock();
        let stream = writer
            .as_mut()
            .ok_or_else(|| Error::Transport("bridge is not connected".to_string()))?;
        if let Err(e) = stream.write_all(buffer).and_then(|_| stream.flush()) {
            *writer = None;
            return Err(e.into());
        }
        Ok(())
    }

    fn set_data_received(&self, callback: DataReceived) {
        *self.inner.data_received.write() = Some(callback);
    }
}

/// A bridge exposes exactly one device: its endpoint.
impl DeviceDiscovery for TcpTransport {
    fn paired_devices(&self) -> Vec<DeviceInfo> {
        let address = self.address();
        vec![DeviceInfo {
            name: format!("bridge {address}"),
            address,
            paired: true,
        }]
    }

    fn discover_devices(&self) -> Vec<DeviceInfo> {
        self.paired_devices()
    }

    fn pair(&self, _address: &str, _pin: &str) -> bool {
        true
    }

    fn select_device(&self, address: &str) -> bool {
        if self.address() != address {
            self.disconnect();
            *self.inner.address.write() = address.to_string();
        }
        true
    }
}
