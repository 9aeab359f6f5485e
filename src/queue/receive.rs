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

//! Receive queue: dispatches incoming commands to registered callbacks.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, trace};

use super::worker::{Schedule, Worker};
use super::{CommandList, CommandStrategy, GeneralStrategy};
use crate::error::Result;
use crate::events::{EventChannel, MessengerEvent};
use crate::protocol::ReceivedCommand;

/// Bounded wait used while draining, so a stopped worker cannot hang callers.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handler invoked for a dispatched command.
pub type CommandCallback = Arc<dyn Fn(&mut ReceivedCommand) + Send + Sync>;

/// Command id to callback mapping with an optional catch-all.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: HashMap<i32, CommandCallback>,
    fallback: Option<CommandCallback>,
}

impl CallbackRegistry {
    pub fn attach(&mut self, id: i32, callback: CommandCallback) {
        self.callbacks.insert(id, callback);
    }

    pub fn attach_default(&mut self, callback: CommandCallback) {
        self.fallback = Some(callback);
    }

    pub fn detach(&mut self, id: i32) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    /// Specific callback for `id`, else the catch-all.
    pub fn resolve(&self, id: i32) -> Option<CommandCallback> {
        self.callbacks
            .get(&id)
            .or(self.fallback.as_ref())
            .cloned()
    }
}

/// Outcome of offering a command to the acknowledge waiter.
#[derive(Debug)]
pub enum Offer {
    /// The waiter took the command.
    Taken,
    /// Not the awaited command; queue it for normal dispatch.
    Rejected(ReceivedCommand),
    /// Not the awaited command, and the waiter asked to drop others.
    Discarded(ReceivedCommand),
}

#[derive(Default)]
struct WaiterState {
    awaiting: Option<i32>,
    discard_others: bool,
    received: Option<ReceivedCommand>,
}

/// Hand-off point between the transport thread and a caller blocked on an
/// acknowledge.
#[derive(Default)]
pub struct AckWaiter {
    state: Mutex<WaiterState>,
    arrived: Condvar,
}

impl AckWaiter {
    /// Start waiting for `ack_id`. Must happen before the request is written.
    pub fn arm(&self, ack_id: i32, discard_others: bool) {
        let mut state = self.state.lock();
        state.awaiting = Some(ack_id);
        state.discard_others = discard_others;
        state.received = None;
    }

    pub fn offer(&self, command: ReceivedCommand) -> Offer {
        let mut state = self.state.lock();
        match state.awaiting {
            Some(id) if id == command.id() => {
                state.awaiting = None;
                state.received = Some(command);
                self.arrived.notify_all();
                Offer::Taken
            }
            Some(_) if state.discard_others => Offer::Discarded(command),
            _ => Offer::Rejected(command),
        }
    }

    /// Block until the awaited command arrives or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Option<ReceivedCommand> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.received.is_none() {
            if self.arrived.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.awaiting = None;
        state.discard_others = false;
        state.received.take()
    }
}

struct ReceiveShared {
    list: Mutex<CommandList<ReceivedCommand>>,
    drained: Condvar,
    callbacks: RwLock<CallbackRegistry>,
}

impl ReceiveShared {
    /// Dispatch one queued command. Returns whether more are queued.
    fn process_queue(&self) -> bool {
        let command = self.list.lock().dequeue();
        if let Some(command) = command {
            self.dispatch(command);
        }

        let list = self.list.lock();
        if list.is_empty() {
            self.drained.notify_all();
        }
        !list.is_empty()
    }

    fn dispatch(&self, mut command: ReceivedCommand) {
        if !command.ok() {
            return;
        }
        let id = command.id();
        let Some(callback) = self.callbacks.read().resolve(id) else {
            debug!("No callback attached for command {}", id);
            return;
        };

        trace!("Dispatching command {}", id);
        if panic::catch_unwind(AssertUnwindSafe(|| callback(&mut command))).is_err() {
            error!("Callback for command {} panicked", id);
        }
    }
}

/// Queue of received commands drained by its own worker thread.
pub struct ReceiveQueue {
    shared: Arc<ReceiveShared>,
    waiter: AckWaiter,
    events: Arc<EventChannel<MessengerEvent>>,
    worker: Worker,
}

impl ReceiveQueue {
    pub fn new(events: Arc<EventChannel<MessengerEvent>>) -> Self {
        let shared = Arc::new(ReceiveShared {
            list: Mutex::new(CommandList::new()),
            drained: Condvar::new(),
            callbacks: RwLock::new(CallbackRegistry::default()),
        });
        let job_shared = shared.clone();
        let worker = Worker::new("receive-queue", Schedule::OnSignal, move || {
            job_shared.process_queue()
        });

        Self {
            shared,
            waiter: AckWaiter::default(),
            events,
            worker,
        }
    }

    pub fn start(&self) -> Result<()> {
        self.worker.start()
    }

    pub fn stop(&self) -> Result<()> {
        self.worker.stop()
    }

    /// Hold back dispatch while a caller waits for an acknowledge.
    pub fn suspend(&self) -> Result<()> {
        self.worker.suspend()
    }

    pub fn resume(&self) -> Result<()> {
        self.worker.resume()
    }

    pub fn is_suspended(&self) -> bool {
        self.worker.is_suspended()
    }

    pub fn waiter(&self) -> &AckWaiter {
        &self.waiter
    }

    /// Accept a freshly parsed command.
    ///
    /// While suspended the command is first offered to the acknowledge
    /// waiter and only queued if the waiter passes on it.
    pub fn queue_command(&self, command: ReceivedCommand) {
        self.events
            .emit(MessengerEvent::LineReceived(command.clone()));

        if self.worker.is_suspended() {
            match self.waiter.offer(command) {
                Offer::Taken => {}
                Offer::Discarded(command) => {
                    debug!(
                        "Discarded command {} while waiting for acknowledge",
                        command.id()
                    );
                }
                Offer::Rejected(command) => {
                    self.shared
                        .list
                        .lock()
                        .enqueue(command, CommandStrategy::Plain);
                    self.worker.signal();
                }
            }
            return;
        }

        self.shared
            .list
            .lock()
            .enqueue(command, CommandStrategy::Plain);
        self.worker.signal();
    }

    pub fn attach(&self, id: i32, callback: CommandCallback) {
        self.shared.callbacks.write().attach(id, callback);
    }

    pub fn attach_default(&self, callback: CommandCallback) {
        self.shared.callbacks.write().attach_default(callback);
    }

    pub fn detach(&self, id: i32) -> bool {
        self.shared.callbacks.write().detach(id)
    }

    pub fn add_general_strategy(&self, strategy: GeneralStrategy) {
        self.shared.list.lock().add_general_strategy(strategy);
    }

    pub fn clear(&self) {
        self.shared.list.lock().clear();
        self.shared.drained.notify_all();
    }

    pub fn len(&self) -> usize {
        self.shared.list.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.list.lock().is_empty()
    }

    /// Block until every queued command has been dispatched.
    ///
    /// Returns immediately on the dispatch thread itself, or when the
    /// worker is not running and the queue could never drain.
    pub fn wait_until_empty(&self) {
        if self.worker.is_current_thread() {
            return;
        }
        let mut list = self.shared.list.lock();
        while !list.is_empty() && self.worker.is_running() {
            self.shared.drained.wait_for(&mut list, DRAIN_POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Codec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn command(line: &str) -> ReceivedCommand {
        ReceivedCommand::parse(line, &Codec::default())
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline && !condition() {
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_registry_prefers_specific_callback() {
        let hits = Arc::new(AtomicUsize::new(0));
        let specific_hits = hits.clone();
        let mut registry = CallbackRegistry::default();
        registry.attach_default(Arc::new(|_: &mut ReceivedCommand| {}));
        registry.attach(
            3,
            Arc::new(move |_: &mut ReceivedCommand| {
                specific_hits.fetch_add(10, Ordering::SeqCst);
            }),
        );

        let mut cmd = command("3");
        if let Some(callback) = registry.resolve(3) {
            callback(&mut cmd);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert!(registry.resolve(4).is_some());
        assert!(registry.detach(3));
        assert!(!registry.detach(3));
    }

    #[test]
    fn test_waiter_match_and_reject() {
        let waiter = AckWaiter::default();
        assert!(matches!(waiter.offer(command("1")), Offer::Rejected(_)));

        waiter.arm(7, false);
        assert!(matches!(waiter.offer(command("6")), Offer::Rejected(_)));
        assert!(matches!(waiter.offer(command("7,ok")), Offer::Taken));
        let reply = waiter.wait(Duration::from_millis(10)).unwrap();
        assert_eq!(reply.arguments(), ["ok"]);
    }

    #[test]
    fn test_waiter_discards_when_asked() {
        let waiter = AckWaiter::default();
        waiter.arm(7, true);
        assert!(matches!(waiter.offer(command("6")), Offer::Discarded(_)));
    }

    #[test]
    fn test_waiter_timeout() {
        let waiter = AckWaiter::default();
        waiter.arm(7, false);
        let started = Instant::now();
        assert!(waiter.wait(Duration::from_millis(50)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
        // Disarmed after the wait.
        assert!(matches!(waiter.offer(command("7")), Offer::Rejected(_)));
    }

    #[test]
    fn test_dispatch_through_worker() {
        let events = Arc::new(EventChannel::default());
        let rx = events.subscribe();
        let queue = ReceiveQueue::new(events);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        queue.attach(
            2,
            Arc::new(move |cmd: &mut ReceivedCommand| {
                sink.lock().push(cmd.read_i32_arg());
            }),
        );
        queue.start().unwrap();

        queue.queue_command(command("2,10"));
        queue.queue_command(command("2,20"));
        queue.queue_command(command("9,ignored"));

        assert!(wait_until(|| seen.lock().len() == 2));
        queue.wait_until_empty();
        assert_eq!(*seen.lock(), vec![10, 20]);
        assert_eq!(rx.len(), 3);
        queue.stop().unwrap();
    }

    #[test]
    fn test_suspended_queue_routes_to_waiter() {
        let events = Arc::new(EventChannel::default());
        let queue = ReceiveQueue::new(events);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        queue.attach_default(Arc::new(move |_: &mut ReceivedCommand| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        queue.start().unwrap();

        queue.suspend().unwrap();
        queue.waiter().arm(5, false);
        queue.queue_command(command("4"));
        queue.queue_command(command("5,ack"));
        assert!(queue.waiter().wait(Duration::from_millis(100)).is_some());
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(queue.len(), 1);

        queue.resume().unwrap();
        assert!(wait_until(|| seen.load(Ordering::SeqCst) == 1));
        queue.stop().unwrap();
    }
}
