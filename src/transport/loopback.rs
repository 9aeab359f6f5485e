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

//! In-memory transport.

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use super::{DataReceived, Transport};
use crate::error::{Error, Result};
use crate::protocol::escaping::decode_latin1;

/// Produces the reply to one write, if any.
pub type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

#[derive(Default)]
struct LoopbackState {
    connected: bool,
    unreachable: bool,
    inbound: Vec<u8>,
    writes: Vec<Vec<u8>>,
}

/// Transport that records writes and delivers injected bytes.
///
/// A responder can answer writes, standing in for the remote firmware.
/// Replies are delivered synchronously on the writing thread.
#[derive(Default)]
pub struct LoopbackTransport {
    state: Mutex<LoopbackState>,
    data_received: RwLock<Option<DataReceived>>,
    responder: Mutex<Option<Responder>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make later connect attempts fail or succeed.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unreachable = !reachable;
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        *self.responder.lock() = Some(Box::new(responder));
    }

    /// Stop answering writes.
    pub fn clear_responder(&self) {
        *self.responder.lock() = None;
    }

    /// Deliver bytes as if they arrived from the device.
    pub fn inject(&self, bytes: &[u8]) {
        self.state.lock().inbound.extend_from_slice(bytes);
        let callback = self.data_received.read().clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Buffers passed to each write call, oldest first.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    /// All written bytes as text.
    pub fn written_text(&self) -> String {
        let state = self.state.lock();
        state.writes.iter().map(|w| decode_latin1(w)).collect()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }
}

impl Transport for LoopbackTransport {
    fn connect(&self) -> bool {
        let mut state = self.state.lock();
        state.connected = !state.unreachable;
        state.connected
    }

    fn disconnect(&self) -> bool {
        std::mem::take(&mut self.state.lock().connected)
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn read(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().inbound)
    }

    fn write(&self, buffer: &[u8]) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(Error::Transport("loopback is not connected".to_string()));
            }
            state.writes.push(buffer.to_vec());
        }
        trace!("Loopback write of {} bytes", buffer.len());

        let reply = self
            .responder
            .lock()
            .as_mut()
            .and_then(|respond| respond(buffer));
        if let Some(reply) = reply {
            self.inject(&reply);
        }
        Ok(())
    }

    fn set_data_received(&self, callback: DataReceived) {
        *self.data_received.write() = Some(callback);
    }
}
