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

//! Messenger facade: callback registration, synchronous and queued sends.

mod communication;

pub use communication::CommunicationManager;

use std::sync::Arc;
use std::time::Instant;

use async_channel::Receiver;
use tracing::{debug, info, warn};

use crate::config::MessengerConfig;
use crate::error::Result;
use crate::events::{EventChannel, MessengerEvent};
use crate::protocol::{Codec, ReceivedCommand, SendCommand};
use crate::queue::{CommandStrategy, GeneralStrategy, ReceiveQueue, SendQueue};
use crate::transport::Transport;

/// How a send treats the send queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendQueueState {
    #[default]
    Default,
    /// Drop everything queued for sending first.
    ClearQueue,
    /// Wait until the send queue is drained first.
    WaitForEmptyQueue,
    /// Jump ahead of queued commands.
    InFrontQueue,
    /// Go after queued commands.
    AtEndQueue,
}

/// How a send treats the receive queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveQueueState {
    /// Wait for the receive queue to drain when an acknowledge is expected.
    #[default]
    Default,
    ClearQueue,
    WaitForEmptyQueue,
}

/// Whether a send goes through the send queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UseQueue {
    #[default]
    UseQueue,
    BypassQueue,
}

/// Host side of the command protocol over one transport.
///
/// Owns the send and receive queues and their worker threads. Dropping the
/// messenger stops both workers.
pub struct CmdMessenger {
    codec: Codec,
    communication: Arc<CommunicationManager>,
    receive_queue: Arc<ReceiveQueue>,
    send_queue: SendQueue,
    events: Arc<EventChannel<MessengerEvent>>,
}

impl CmdMessenger {
    /// Wire up the queues to `transport` and start their workers.
    pub fn new(transport: Arc<dyn Transport>, config: &MessengerConfig) -> Result<Self> {
        let codec = Codec::from_config(config)?;
        let events = Arc::new(EventChannel::default());
        let receive_queue = Arc::new(ReceiveQueue::new(events.clone()));
        let communication = Arc::new(CommunicationManager::new(
            transport.clone(),
            receive_queue.clone(),
            codec,
            config.print_lf_cr,
            events.clone(),
        ));
        let send_queue = SendQueue::new(
            communication.clone(),
            events.clone(),
            config.send_buffer_max_length,
            config.max_queue_length,
        );

        let weak = Arc::downgrade(&communication);
        transport.set_data_received(Arc::new(move || {
            if let Some(communication) = weak.upgrade() {
                communication.on_data_received();
            }
        }));

        receive_queue.start()?;
        send_queue.start()?;
        info!(
            "Messenger ready (separators {:?} {:?}, escape {:?}, board {})",
            codec.field_separator(),
            codec.command_separator(),
            codec.escape_character(),
            codec.board_type().as_str()
        );

        Ok(Self {
            codec,
            communication,
            receive_queue,
            send_queue,
            events,
        })
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn connect(&self) -> bool {
        self.communication.connect()
    }

    pub fn disconnect(&self) -> bool {
        self.communication.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.communication.is_connected()
    }

    /// When the most recent line arrived from the device.
    pub fn last_received_command_timestamp(&self) -> Option<Instant> {
        self.communication.last_line_timestamp()
    }

    /// Stream of sent and received lines.
    pub fn events(&self) -> Receiver<MessengerEvent> {
        self.events.subscribe()
    }

    /// Call `callback` for every dispatched command with `id`.
    pub fn attach<F>(&self, id: i32, callback: F)
    where
        F: Fn(&mut ReceivedCommand) + Send + Sync + 'static,
    {
        self.receive_queue.attach(id, Arc::new(callback));
    }

    /// Call `callback` for dispatched commands without a specific callback.
    pub fn attach_default<F>(&self, callback: F)
    where
        F: Fn(&mut ReceivedCommand) + Send + Sync + 'static,
    {
        self.receive_queue.attach_default(Arc::new(callback));
    }

    pub fn detach(&self, id: i32) -> bool {
        self.receive_queue.detach(id)
    }

    /// Write `command` right away, bypassing the send queue.
    ///
    /// If the command requires an acknowledge this blocks until the reply
    /// arrives or the timeout elapses; on timeout the returned command is
    /// invalid.
    pub fn send_command(&self, command: SendCommand) -> Result<ReceivedCommand> {
        self.send_command_with(
            command,
            SendQueueState::InFrontQueue,
            ReceiveQueueState::Default,
            UseQueue::BypassQueue,
        )
    }

    /// Send with explicit queue handling.
    ///
    /// Commands requiring an acknowledge, or sent with
    /// [`UseQueue::BypassQueue`], are written synchronously. Others are
    /// queued at the front, or at the back for [`SendQueueState::AtEndQueue`],
    /// and an invalid command is returned at once.
    pub fn send_command_with(
        &self,
        mut command: SendCommand,
        send_state: SendQueueState,
        receive_state: ReceiveQueueState,
        use_queue: UseQueue,
    ) -> Result<ReceivedCommand> {
        let synchronous = command.requires_ack() || use_queue == UseQueue::BypassQueue;
        let receive_state = match receive_state {
            ReceiveQueueState::Default if command.requires_ack() => {
                ReceiveQueueState::WaitForEmptyQueue
            }
            state => state,
        };

        if send_state == SendQueueState::ClearQueue {
            self.send_queue.clear();
        }
        if receive_state == ReceiveQueueState::ClearQueue {
            self.receive_queue.clear();
        }

        if send_state == SendQueueState::WaitForEmptyQueue
            || (synchronous && send_state == SendQueueState::AtEndQueue)
        {
            self.send_queue.wait_until_empty();
        }
        if receive_state == ReceiveQueueState::WaitForEmptyQueue {
            self.receive_queue.wait_until_empty();
        }

        if synchronous {
            return self
                .communication
                .execute_send_command(&mut command, send_state);
        }

        if send_state == SendQueueState::AtEndQueue {
            self.send_queue.queue_command(command, CommandStrategy::Plain);
        } else {
            self.send_queue.send_command(command);
        }
        Ok(ReceivedCommand::empty())
    }

    /// Put `command` at the back of the send queue.
    pub fn queue_command(&self, command: SendCommand) {
        self.send_queue.queue_command(command, CommandStrategy::Plain);
    }

    /// Queue `command` with a placement strategy.
    pub fn queue_command_with(&self, command: SendCommand, strategy: CommandStrategy) {
        self.send_queue.queue_command(command, strategy);
    }

    pub fn add_send_strategy(&self, strategy: GeneralStrategy) {
        self.send_queue.add_general_strategy(strategy);
    }

    pub fn add_receive_strategy(&self, strategy: GeneralStrategy) {
        self.receive_queue.add_general_strategy(strategy);
    }

    pub fn clear_send_queue(&self) {
        self.send_queue.clear();
    }

    pub fn clear_receive_queue(&self) {
        self.receive_queue.clear();
    }

    /// Stop both queue workers.
    pub fn stop(&self) {
        for (name, result) in [
            ("send", self.send_queue.stop()),
            ("receive", self.receive_queue.stop()),
        ] {
            match result {
                Ok(()) => debug!("Stopped {} queue", name),
                Err(e) => warn!("Stopping {} queue: {}", name, e),
            }
        }
    }
}

impl Drop for CmdMessenger {
    fn drop(&mut self) {
        let _ = self.send_queue.stop();
        let _ = self.receive_queue.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use std::time::Duration;

    fn messenger(config: &MessengerConfig) -> (Arc<LoopbackTransport>, CmdMessenger) {
        let transport = Arc::new(LoopbackTransport::new());
        let messenger = CmdMessenger::new(transport.clone(), config).unwrap();
        assert!(messenger.connect());
        (transport, messenger)
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline && !condition() {
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_send_without_ack_writes_once() {
        let (transport, messenger) = messenger(&MessengerConfig::default());
        let reply = messenger
            .send_command(SendCommand::new(4).with_argument(1i16))
            .unwrap();
        assert!(!reply.ok());
        assert_eq!(transport.written_text(), "4,1;");
    }

    #[test]
    fn test_print_lf_cr() {
        let config = MessengerConfig {
            print_lf_cr: true,
            ..MessengerConfig::default()
        };
        let (transport, messenger) = messenger(&config);
        messenger.send_command(SendCommand::new(2)).unwrap();
        assert_eq!(transport.written_text(), "2;\r\n");
    }

    #[test]
    fn test_batching_respects_ack_boundary() {
        let (transport, messenger) = messenger(&MessengerConfig::default());
        transport.set_responder(|written| written.starts_with(b"10").then(|| b"11,done;".to_vec()));

        // Hold the worker back so every command is queued before it runs.
        messenger.send_queue.suspend().unwrap();
        messenger.queue_command(SendCommand::new(1));
        messenger.queue_command(SendCommand::new(2));
        messenger.queue_command(SendCommand::with_ack(10, 11, Duration::from_millis(500)));
        messenger.queue_command(SendCommand::new(3));
        messenger.send_queue.resume().unwrap();

        assert!(wait_until(|| transport.writes().len() == 3));
        let writes: Vec<String> = transport
            .writes()
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect();
        assert_eq!(writes, vec!["1;2;", "10;", "3;"]);
    }

    #[test]
    fn test_collapse_through_queue() {
        let (transport, messenger) = messenger(&MessengerConfig::default());
        messenger.send_queue.suspend().unwrap();
        messenger.queue_command_with(
            SendCommand::new(5).with_argument(1i32),
            CommandStrategy::Collapse,
        );
        messenger.queue_command(SendCommand::new(6));
        messenger.queue_command_with(
            SendCommand::new(5).with_argument(2i32),
            CommandStrategy::Collapse,
        );
        assert_eq!(messenger.send_queue.len(), 2);
        messenger.send_queue.resume().unwrap();

        assert!(wait_until(|| transport.written_text() == "5,2;6;"));
    }

    #[test]
    fn test_clear_send_queue() {
        let (transport, messenger) = messenger(&MessengerConfig::default());
        messenger.send_queue.suspend().unwrap();
        messenger.queue_command(SendCommand::new(1));
        messenger
            .send_command_with(
                SendCommand::new(2),
                SendQueueState::ClearQueue,
                ReceiveQueueState::Default,
                UseQueue::UseQueue,
            )
            .unwrap();
        assert_eq!(messenger.send_queue.len(), 1);
        messenger.send_queue.resume().unwrap();

        assert!(wait_until(|| transport.written_text() == "2;"));
    }

    #[test]
    fn test_in_front_queue_jumps_ahead() {
        let (transport, messenger) = messenger(&MessengerConfig::default());
        messenger.send_queue.suspend().unwrap();
        messenger.queue_command(SendCommand::new(1));
        messenger
            .send_command_with(
                SendCommand::new(9),
                SendQueueState::InFrontQueue,
                ReceiveQueueState::Default,
                UseQueue::UseQueue,
            )
            .unwrap();
        messenger.send_queue.resume().unwrap();

        assert!(wait_until(|| transport.written_text() == "9;1;"));
    }
}
