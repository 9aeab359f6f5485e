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

//! Send queue: batches queued commands into transport writes.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

use super::worker::{Schedule, Worker};
use super::{CommandList, CommandStrategy, GeneralStrategy};
use crate::error::Result;
use crate::events::{EventChannel, MessengerEvent};
use crate::messenger::{CommunicationManager, SendQueueState};
use crate::protocol::SendCommand;

/// Bounded wait while blocked on a full or draining queue.
const SPACE_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct SendShared {
    list: Mutex<CommandList<SendCommand>>,
    space: Condvar,
    communication: Arc<CommunicationManager>,
    events: Arc<EventChannel<MessengerEvent>>,
    max_buffer_len: usize,
}

impl SendShared {
    fn take_next(&self, batched: usize) -> Option<SendCommand> {
        let mut list = self.list.lock();
        let requires_ack = list.prepare_dequeue()?.requires_ack();
        // A command waiting for an acknowledge always goes out on its own.
        if requires_ack && batched > 0 {
            return None;
        }
        let command = list.dequeue();
        self.space.notify_all();
        command
    }

    /// Send one batch. Returns whether commands remain queued.
    fn send_from_queue(&self) -> bool {
        let mut batch = String::new();
        let mut batch_len = 0;
        let mut batched = 0;

        while batch_len < self.max_buffer_len {
            let Some(mut command) = self.take_next(batched) else {
                break;
            };

            if command.requires_ack() {
                if let Err(e) = self
                    .communication
                    .execute_send_command(&mut command, SendQueueState::Default)
                {
                    warn!("Queued command {} not sent: {}", command.id(), e);
                }
                continue;
            }

            let line = self.communication.render(&mut command);
            batch_len += line.chars().count();
            batch.push_str(&line);
            batched += 1;
            self.events.emit(MessengerEvent::LineSent(line));
        }

        if !batch.is_empty() {
            trace!("Sending batch of {} command(s)", batched);
            self.communication.execute_send_string(&batch);
        }

        let list = self.list.lock();
        if list.is_empty() {
            self.space.notify_all();
        }
        !list.is_empty()
    }
}

/// Outgoing command queue drained by its own worker thread.
pub struct SendQueue {
    shared: Arc<SendShared>,
    max_queue_len: usize,
    worker: Worker,
}

impl SendQueue {
    pub fn new(
        communication: Arc<CommunicationManager>,
        events: Arc<EventChannel<MessengerEvent>>,
        max_buffer_len: usize,
        max_queue_len: usize,
    ) -> Self {
        let shared = Arc::new(SendShared {
            list: Mutex::new(CommandList::new()),
            space: Condvar::new(),
            communication,
            events,
            max_buffer_len: max_buffer_len.max(1),
        });
        let job_shared = shared.clone();
        let worker = Worker::new("send-queue", Schedule::OnSignal, move || {
            job_shared.send_from_queue()
        });

        Self {
            shared,
            max_queue_len: max_queue_len.max(1),
            worker,
        }
    }

    pub fn start(&self) -> Result<()> {
        self.worker.start()
    }

    pub fn stop(&self) -> Result<()> {
        self.worker.stop()
    }

    /// Hold queued commands back until [`SendQueue::resume`].
    pub fn suspend(&self) -> Result<()> {
        self.worker.suspend()
    }

    pub fn resume(&self) -> Result<()> {
        self.worker.resume()
    }

    /// Enqueue a command, blocking while the queue is full.
    pub fn queue_command(&self, command: SendCommand, strategy: CommandStrategy) {
        let mut list = self.shared.list.lock();
        while list.len() >= self.max_queue_len
            && self.worker.is_running()
            && !self.worker.is_current_thread()
        {
            self.shared.space.wait_for(&mut list, SPACE_POLL_INTERVAL);
        }
        list.enqueue(command, strategy);
        drop(list);
        self.worker.signal();
    }

    /// Put a command ahead of everything queued.
    pub fn send_command(&self, command: SendCommand) {
        self.queue_command(command, CommandStrategy::FrontInsert);
    }

    pub fn add_general_strategy(&self, strategy: GeneralStrategy) {
        self.shared.list.lock().add_general_strategy(strategy);
    }

    pub fn clear(&self) {
        self.shared.list.lock().clear();
        self.shared.space.notify_all();
    }

    pub fn len(&self) -> usize {
        self.shared.list.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.list.lock().is_empty()
    }

    /// Block until the worker has taken every queued command.
    pub fn wait_until_empty(&self) {
        if self.worker.is_current_thread() {
            return;
        }
        let mut list = self.shared.list.lock();
        while !list.is_empty() && self.worker.is_running() {
            self.shared.space.wait_for(&mut list, SPACE_POLL_INTERVAL);
        }
    }
}
