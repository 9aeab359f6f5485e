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

//! Bridge between the queues and the transport.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::SendQueueState;
use crate::error::Result;
use crate::events::{EventChannel, MessengerEvent};
use crate::protocol::escaping::encode_latin1;
use crate::protocol::{Codec, LineAssembler, ReceivedCommand, SendCommand};
use crate::queue::ReceiveQueue;
use crate::transport::Transport;

/// Writes framed commands and turns inbound bytes into queued commands.
pub struct CommunicationManager {
    transport: Arc<dyn Transport>,
    receive_queue: Arc<ReceiveQueue>,
    codec: Codec,
    print_lf_cr: bool,
    events: Arc<EventChannel<MessengerEvent>>,
    send_lock: Mutex<()>,
    assembler: Mutex<LineAssembler>,
    last_line: Mutex<Option<Instant>>,
}

impl CommunicationManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        receive_queue: Arc<ReceiveQueue>,
        codec: Codec,
        print_lf_cr: bool,
        events: Arc<EventChannel<MessengerEvent>>,
    ) -> Self {
        Self {
            transport,
            receive_queue,
            codec,
            print_lf_cr,
            events,
            send_lock: Mutex::new(()),
            assembler: Mutex::new(LineAssembler::new(codec)),
            last_line: Mutex::new(None),
        }
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Open the link if needed. Returns whether it is open afterwards.
    pub fn connect(&self) -> bool {
        if self.transport.is_connected() {
            return true;
        }
        self.assembler.lock().reset();
        self.transport.connect()
    }

    /// Close the link if open. Returns whether it was open.
    pub fn disconnect(&self) -> bool {
        self.transport.is_connected() && self.transport.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// When the most recent line arrived, valid or not.
    pub fn last_line_timestamp(&self) -> Option<Instant> {
        *self.last_line.lock()
    }

    /// Render a command into its framed line.
    pub fn render(&self, command: &mut SendCommand) -> String {
        let mut line = command.command_string(&self.codec);
        if self.print_lf_cr {
            line.push_str("\r\n");
        }
        line
    }

    /// Write a pre-rendered batch of lines.
    pub fn execute_send_string(&self, lines: &str) {
        let _guard = self.send_lock.lock();
        self.write_str(lines);
    }

    /// Write one command; if it requires an acknowledge, block for it.
    ///
    /// The receive queue is suspended for the duration of the wait so the
    /// reply is intercepted before ordinary dispatch, and resumed
    /// afterwards whatever the outcome. A timeout yields an invalid
    /// command.
    pub fn execute_send_command(
        &self,
        command: &mut SendCommand,
        send_state: SendQueueState,
    ) -> Result<ReceivedCommand> {
        let _guard = self.send_lock.lock();
        let line = self.render(command);

        if !command.requires_ack() {
            self.write_str(&line);
            self.events.emit(MessengerEvent::LineSent(line));
            return Ok(ReceivedCommand::empty());
        }

        self.receive_queue.suspend()?;
        self.receive_queue.waiter().arm(
            command.ack_command_id(),
            send_state == SendQueueState::ClearQueue,
        );
        self.write_str(&line);
        self.events.emit(MessengerEvent::LineSent(line));

        let reply = self.receive_queue.waiter().wait(command.ack_timeout());
        let resumed = self.receive_queue.resume();

        match &reply {
            Some(_) => trace!("Acknowledge {} received", command.ack_command_id()),
            None => debug!(
                "No acknowledge {} for command {} within {:?}",
                command.ack_command_id(),
                command.id(),
                command.ack_timeout()
            ),
        }
        resumed?;
        Ok(reply.unwrap_or_else(ReceivedCommand::empty))
    }

    fn write_str(&self, text: &str) {
        trace!("Writing {:?}", text);
        if let Err(e) = self.transport.write(&encode_latin1(text)) {
            warn!("Write failed: {}", e);
        }
    }

    /// Transport notification: assemble lines and queue the commands.
    pub fn on_data_received(&self) {
        let commands = {
            let mut assembler = self.assembler.lock();
            let bytes = self.transport.read();
            if bytes.is_empty() {
                return;
            }
            assembler.push(&bytes)
        };

        for command in commands {
            *self.last_line.lock() = Some(Instant::now());
            if command.ok() {
                self.receive_queue.queue_command(command);
            } else {
                debug!("Dropping malformed line {:?}", command.raw_string());
            }
        }
    }
}
