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

//! Connection manager: finds the device, connects, and watches the link.
//!
//! A worker ticks at a fixed cadence and, depending on the current
//! [`Mode`], scans for the device, connects to a configured address, or
//! runs the watchdog. Progress is traced and published as a separate
//! lossy stream of [`ProgressEvent`]s.

pub mod pairing;
pub mod settings;
pub mod watchdog;

pub use settings::{ConnectionSettings, JsonFileStorer, MemoryStorer, SettingsStorer};
pub use watchdog::{Watchdog, WatchdogAction};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::events::{ConnectionEvent, EventChannel, ProgressEvent};
use crate::messenger::{CmdMessenger, ReceiveQueueState, SendQueueState, UseQueue};
use crate::protocol::SendCommand;
use crate::queue::{Schedule, Worker};
use crate::state::{ConnectionState, LinkState, Mode};
use crate::transport::{DeviceDiscovery, DeviceInfo};

/// Outcome of the identify challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    NotAvailable,
    Available,
    IdentityMismatch,
}

struct Inner {
    messenger: Arc<CmdMessenger>,
    discovery: Arc<dyn DeviceDiscovery>,
    config: ConnectionConfig,
    storer: Arc<dyn SettingsStorer>,
    settings: Mutex<ConnectionSettings>,
    link: LinkState,
    watchdog: Mutex<Watchdog>,
    watchdog_enabled: AtomicBool,
    device_scan_enabled: AtomicBool,
    persistent_settings: AtomicBool,
    stopping: AtomicBool,
    events: EventChannel<ConnectionEvent>,
    progress: EventChannel<ProgressEvent>,
}

impl Inner {
    fn progress(&self, level: u8, description: impl Into<String>) {
        let description = description.into();
        match level {
            1 => info!("{}", description),
            2 => debug!("{}", description),
            _ => trace!("{}", description),
        }
        self.progress.emit(ProgressEvent { level, description });
    }

    fn tick(&self) {
        match self.link.mode() {
            Mode::Scan => self.do_work_scan(),
            Mode::Connect => self.do_work_connect(),
            Mode::Watchdog => self.do_work_watchdog(),
            Mode::Wait => {}
        }
    }

    fn keep_going(&self, mode: Mode) -> bool {
        !self.stopping.load(Ordering::SeqCst) && self.link.mode() == mode
    }

    fn do_work_scan(&self) {
        let stored = self.settings.lock().device_address.clone();
        let mut tried = HashSet::new();

        if let Some(address) = stored {
            self.progress(3, format!("Trying last known device {}", address));
            if self.try_connection(&address) {
                return;
            }
            tried.insert(address);
        }

        for device in self.discovery.paired_devices() {
            if !self.keep_going(Mode::Scan) {
                return;
            }
            if tried.insert(device.address.clone()) && self.try_connection(&device.address) {
                return;
            }
        }

        for device in self.discovery.discover_devices() {
            if !self.keep_going(Mode::Scan) {
                return;
            }
            if !tried.insert(device.address.clone()) {
                continue;
            }
            if !device.paired && !self.pair(&device) {
                continue;
            }
            if self.try_connection(&device.address) {
                return;
            }
        }

        if self.keep_going(Mode::Scan) {
            self.progress(3, "No device found, scanning again");
        }
    }

    fn do_work_connect(&self) {
        let address = self
            .config
            .device_address
            .clone()
            .or_else(|| self.settings.lock().device_address.clone());

        match address {
            Some(address) => {
                if !self.try_connection(&address) {
                    self.progress(3, format!("Device {} not available", address));
                }
            }
            None => self.progress(2, "No device address configured"),
        }
    }

    fn pair(&self, device: &DeviceInfo) -> bool {
        self.progress(2, format!("Pairing with {} ({})", device.name, device.address));
        let candidates = {
            let settings = self.settings.lock();
            pairing::pin_candidates(
                self.config.device_pin.as_deref(),
                settings.pin_for(&device.address),
                &self.config.general_pins,
            )
        };

        let pin = pairing::pair_device(
            self.discovery.as_ref(),
            &device.address,
            &candidates,
            self.config.pairing_backoff(),
            || self.keep_going(Mode::Scan),
        );

        match pin {
            Some(pin) => {
                self.settings.lock().update_device_pin(&device.address, &pin);
                self.store_settings();
                true
            }
            None => {
                self.progress(3, format!("Could not pair with {}", device.address));
                false
            }
        }
    }

    fn try_connection(&self, address: &str) -> bool {
        self.progress(2, format!("Trying device {}", address));

        if !self.discovery.select_device(address) {
            self.progress(3, format!("Device {} cannot be selected", address));
            return false;
        }
        if !self.messenger.connect() {
            self.progress(3, format!("Unable to open connection to {}", address));
            return false;
        }

        match self.device_status() {
            DeviceStatus::Available => {
                self.connection_found(address);
                true
            }
            DeviceStatus::IdentityMismatch => {
                self.progress(2, format!("Device {} is not the expected device", address));
                self.messenger.disconnect();
                false
            }
            DeviceStatus::NotAvailable => {
                self.progress(3, format!("No response from {}", address));
                self.messenger.disconnect();
                false
            }
        }
    }

    /// Challenge the device up to the configured number of tries.
    fn device_status(&self) -> DeviceStatus {
        for attempt in 1..=self.config.identify_tries.max(1) {
            self.progress(3, format!("Polling device, try #{}", attempt));
            match self.identify() {
                DeviceStatus::NotAvailable => continue,
                status => return status,
            }
        }
        DeviceStatus::NotAvailable
    }

    fn identify(&self) -> DeviceStatus {
        let id = self.config.identify_command_id;
        let challenge = SendCommand::with_ack(id, id, self.config.identify_timeout());
        let mut reply = match self.messenger.send_command_with(
            challenge,
            SendQueueState::InFrontQueue,
            ReceiveQueueState::Default,
            UseQueue::BypassQueue,
        ) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Identify command failed: {}", e);
                return DeviceStatus::NotAvailable;
            }
        };

        if !reply.ok() {
            return DeviceStatus::NotAvailable;
        }
        match self.config.device_id() {
            Some(expected) if reply.read_string_arg() != expected => {
                self.progress(3, "Invalid device response. Device ID mismatch.");
                DeviceStatus::IdentityMismatch
            }
            _ => DeviceStatus::Available,
        }
    }

    fn connection_found(&self, address: &str) {
        self.link.set_mode(Mode::Wait);
        self.link.set_connected(address.to_string());
        self.progress(1, format!("Connected to {}", address));

        if self.watchdog_enabled.load(Ordering::SeqCst) {
            self.start_watchdog();
        }

        self.settings.lock().set_device_address(address);
        self.store_settings();

        self.events.emit(ConnectionEvent::ConnectionFound {
            address: address.to_string(),
        });
    }

    fn connection_timeout(&self) {
        self.stop_watchdog();
        self.link.set_mode(Mode::Wait);
        self.disconnect();
        self.events.emit(ConnectionEvent::ConnectionTimeout);

        self.start_searching();
    }

    fn do_work_watchdog(&self) {
        let last_line = self.messenger.last_received_command_timestamp();
        let (action, timeout, max_tries) = {
            let mut watchdog = self.watchdog.lock();
            let action = watchdog.check(Instant::now(), last_line);
            (action, watchdog.timeout(), watchdog.max_tries())
        };

        match action {
            WatchdogAction::Idle => {}
            WatchdogAction::Healthy => self.progress(3, "Successful watchdog response."),
            WatchdogAction::Probe { attempt } => {
                // Queued in front so it stays out of the way of pending sends.
                let probe = SendCommand::new(self.config.identify_command_id);
                if let Err(e) = self.messenger.send_command_with(
                    probe,
                    SendQueueState::InFrontQueue,
                    ReceiveQueueState::Default,
                    UseQueue::UseQueue,
                ) {
                    warn!("Watchdog probe failed: {}", e);
                }
                if attempt == 1 {
                    self.progress(
                        3,
                        format!(
                            "Watchdog detected no communication for {:.1}s, asking for response",
                            timeout.as_secs_f64()
                        ),
                    );
                } else {
                    self.progress(
                        3,
                        format!("Watchdog received no response, performing try #{}", attempt),
                    );
                }
            }
            WatchdogAction::Expired => {
                self.progress(
                    2,
                    format!("Watchdog received no response after final try #{}", max_tries),
                );
                self.connection_timeout();
            }
        }
    }

    fn disconnect(&self) -> bool {
        if self.link.is_connected() {
            self.link.set_disconnected();
            return self.messenger.disconnect();
        }
        true
    }

    fn start_watchdog(&self) {
        if self.link.mode() != Mode::Watchdog && self.link.is_connected() {
            self.progress(1, "Starting watchdog.");
            self.watchdog.lock().arm(Instant::now());
            self.link.set_mode(Mode::Watchdog);
        }
    }

    fn stop_watchdog(&self) {
        if self.link.mode() == Mode::Watchdog {
            self.progress(1, "Stopping watchdog.");
            self.link.set_mode(Mode::Wait);
        }
    }

    fn start_searching(&self) {
        if self.device_scan_enabled.load(Ordering::SeqCst) {
            self.start_scan();
        } else {
            self.start_connect();
        }
    }

    fn start_scan(&self) {
        if self.link.mode() != Mode::Scan && !self.link.is_connected() {
            self.progress(1, "Starting device scan.");
            self.link.set_mode(Mode::Scan);
        }
    }

    fn start_connect(&self) {
        if self.link.mode() != Mode::Connect && !self.link.is_connected() {
            self.progress(1, "Connecting to configured device.");
            self.link.set_mode(Mode::Connect);
        }
    }

    fn store_settings(&self) {
        if !self.persistent_settings.load(Ordering::SeqCst) {
            return;
        }
        let settings = self.settings.lock().clone();
        if let Err(e) = self.storer.store(&settings) {
            warn!("Failed to store connection settings: {}", e);
        }
    }
}

/// Keeps a [`CmdMessenger`] connected to the right device.
pub struct ConnectionManager {
    inner: Arc<Inner>,
    worker: Worker,
}

impl ConnectionManager {
    /// Create a stopped manager.
    ///
    /// Fails if the watchdog is enabled without a unique device id.
    pub fn new(
        messenger: Arc<CmdMessenger>,
        discovery: Arc<dyn DeviceDiscovery>,
        config: &ConnectionConfig,
        storer: Arc<dyn SettingsStorer>,
    ) -> Result<Self> {
        if config.watchdog_enabled && config.device_id().is_none() {
            return Err(Error::WatchdogWithoutDeviceId);
        }

        let settings = if config.persistent_settings {
            storer.load().unwrap_or_else(|e| {
                warn!("Ignoring unreadable connection settings: {}", e);
                ConnectionSettings::default()
            })
        } else {
            ConnectionSettings::default()
        };

        let inner = Arc::new(Inner {
            messenger,
            discovery,
            config: config.clone(),
            storer,
            settings: Mutex::new(settings),
            link: LinkState::new(),
            watchdog: Mutex::new(Watchdog::new(
                config.watchdog_timeout(),
                config.watchdog_retry_timeout(),
                config.watchdog_max_tries,
            )),
            watchdog_enabled: AtomicBool::new(config.watchdog_enabled),
            device_scan_enabled: AtomicBool::new(config.device_scan_enabled),
            persistent_settings: AtomicBool::new(config.persistent_settings),
            stopping: AtomicBool::new(false),
            events: EventChannel::unbounded(),
            progress: EventChannel::default(),
        });

        let job = inner.clone();
        let worker = Worker::new(
            "connection-manager",
            Schedule::Every(config.tick_interval()),
            move || {
                job.tick();
                false
            },
        );

        let hook = Arc::downgrade(&inner);
        worker.set_fault_hook(move || {
            if let Some(inner) = hook.upgrade() {
                inner.link.set_disconnected();
                inner.link.set_mode(Mode::Wait);
            }
        });

        Ok(Self { inner, worker })
    }

    /// Start the worker and begin scanning or connecting.
    pub fn start(&self) -> Result<()> {
        self.inner.stopping.store(false, Ordering::SeqCst);
        if self.worker.is_stopped() {
            self.worker.start()?;
        }
        self.inner.start_searching();
        Ok(())
    }

    /// Stop the worker and drop the connection.
    pub fn stop(&self) -> Result<()> {
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.link.set_mode(Mode::Wait);
        if !self.worker.is_stopped() {
            self.worker.stop()?;
        }
        self.inner.disconnect();
        Ok(())
    }

    /// Enable or disable the watchdog. Requires a unique device id.
    pub fn set_watchdog_enabled(&self, enabled: bool) -> Result<()> {
        if enabled && self.inner.config.device_id().is_none() {
            return Err(Error::WatchdogWithoutDeviceId);
        }
        self.inner.watchdog_enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_watchdog_enabled(&self) -> bool {
        self.inner.watchdog_enabled.load(Ordering::SeqCst)
    }

    /// Scan for devices, or only connect to the configured address.
    pub fn set_device_scan_enabled(&self, enabled: bool) {
        self.inner.device_scan_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_device_scan_enabled(&self) -> bool {
        self.inner.device_scan_enabled.load(Ordering::SeqCst)
    }

    /// Store the last device and pins through the settings storer.
    pub fn set_persistent_settings(&self, enabled: bool) {
        self.inner.persistent_settings.store(enabled, Ordering::SeqCst);
    }

    pub fn mode(&self) -> Mode {
        self.inner.link.mode()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.link.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.link.connection_state()
    }

    pub fn device_address(&self) -> Option<String> {
        self.inner.link.device_address()
    }

    pub fn settings(&self) -> ConnectionSettings {
        self.inner.settings.lock().clone()
    }

    /// Stream of connection lifecycle events. Nothing is dropped.
    pub fn events(&self) -> Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Stream of progress messages. The oldest are dropped when unread.
    pub fn progress(&self) -> Receiver<ProgressEvent> {
        self.inner.progress.subscribe()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
    }
}
