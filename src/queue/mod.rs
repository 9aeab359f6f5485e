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

//! Command queues and their worker threads.
//!
//! Both directions share [`CommandList`]: a FIFO buffer whose order can be
//! bent per command by a [`CommandStrategy`] and trimmed on every enqueue
//! and dequeue by the queue's [`GeneralStrategy`] set.

pub mod receive;
pub mod send;
pub mod worker;

pub use receive::{AckWaiter, CallbackRegistry, CommandCallback, ReceiveQueue};
pub use send::SendQueue;
pub use worker::{Schedule, Worker, WorkerState};

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::protocol::Queueable;

/// Placement rule for a single enqueued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandStrategy {
    /// Append at the back.
    #[default]
    Plain,
    /// Replace a queued command with the same id in place, else append.
    Collapse,
    /// Insert ahead of everything already queued.
    FrontInsert,
}

/// Rule applied to the whole queue on every enqueue and dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneralStrategy {
    /// Drop commands older than `max_age`, oldest first, keeping at least one.
    StaleEvict { max_age: Duration },
}

impl GeneralStrategy {
    fn apply<C: Queueable>(&self, entries: &mut VecDeque<C>, now: Instant) {
        match *self {
            GeneralStrategy::StaleEvict { max_age } => {
                let mut evicted = 0;
                while entries.len() > 1
                    && entries
                        .front()
                        .is_some_and(|c| now.saturating_duration_since(c.timestamp()) > max_age)
                {
                    entries.pop_front();
                    evicted += 1;
                }
                if evicted > 0 {
                    debug!("Evicted {} stale command(s)", evicted);
                }
            }
        }
    }
}

/// Ordered command buffer shared by the send and receive queues.
#[derive(Debug)]
pub struct CommandList<C> {
    entries: VecDeque<C>,
    general: Vec<GeneralStrategy>,
}

impl<C: Queueable> CommandList<C> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            general: Vec::new(),
        }
    }

    pub fn add_general_strategy(&mut self, strategy: GeneralStrategy) {
        self.general.push(strategy);
    }

    /// Place `command` according to `strategy`, then run general strategies.
    pub fn enqueue(&mut self, command: C, strategy: CommandStrategy) {
        match strategy {
            CommandStrategy::Plain => self.entries.push_back(command),
            CommandStrategy::FrontInsert => self.entries.push_front(command),
            CommandStrategy::Collapse => {
                let id = command.command_id();
                match self.entries.iter_mut().find(|c| c.command_id() == id) {
                    Some(existing) => *existing = command,
                    None => self.entries.push_back(command),
                }
            }
        }
        self.apply_general();
    }

    /// Run general strategies and peek at the head.
    pub fn prepare_dequeue(&mut self) -> Option<&C> {
        self.apply_general();
        self.entries.front()
    }

    /// Run general strategies and remove the head.
    pub fn dequeue(&mut self) -> Option<C> {
        self.apply_general();
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &C> {
        self.entries.iter()
    }

    fn apply_general(&mut self) {
        if self.general.is_empty() {
            return;
        }
        let now = Instant::now();
        for strategy in &self.general {
            strategy.apply(&mut self.entries, now);
        }
    }
}

impl<C: Queueable> Default for CommandList<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Entry {
        id: i32,
        payload: &'static str,
        timestamp: Instant,
    }

    impl Entry {
        fn new(id: i32, payload: &'static str) -> Self {
            Self {
                id,
                payload,
                timestamp: Instant::now(),
            }
        }

        fn aged(id: i32, age: Duration) -> Self {
            Self {
                id,
                payload: "",
                timestamp: Instant::now() - age,
            }
        }
    }

    impl Queueable for Entry {
        fn command_id(&self) -> i32 {
            self.id
        }

        fn timestamp(&self) -> Instant {
            self.timestamp
        }
    }

    fn drain(list: &mut CommandList<Entry>) -> Vec<i32> {
        std::iter::from_fn(|| list.dequeue()).map(|e| e.id).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut list = CommandList::new();
        for id in [1, 2, 3] {
            list.enqueue(Entry::new(id, ""), CommandStrategy::Plain);
        }
        assert_eq!(drain(&mut list), vec![1, 2, 3]);
    }

    #[test]
    fn test_collapse_keeps_position() {
        let mut list = CommandList::new();
        list.enqueue(Entry::new(5, "first"), CommandStrategy::Collapse);
        list.enqueue(Entry::new(6, ""), CommandStrategy::Plain);
        list.enqueue(Entry::new(5, "second"), CommandStrategy::Collapse);

        assert_eq!(list.len(), 2);
        let head = list.dequeue().unwrap();
        assert_eq!(head.id, 5);
        assert_eq!(head.payload, "second");
    }

    #[test]
    fn test_collapse_single_id() {
        let mut list = CommandList::new();
        list.enqueue(Entry::new(5, "a"), CommandStrategy::Collapse);
        list.enqueue(Entry::new(5, "b"), CommandStrategy::Collapse);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_front_insert() {
        let mut list = CommandList::new();
        list.enqueue(Entry::new(1, ""), CommandStrategy::Plain);
        list.enqueue(Entry::new(2, ""), CommandStrategy::Plain);
        list.enqueue(Entry::new(9, ""), CommandStrategy::FrontInsert);
        assert_eq!(drain(&mut list), vec![9, 1, 2]);
    }

    #[test]
    fn test_stale_evict_keeps_one() {
        let mut list = CommandList::new();
        list.add_general_strategy(GeneralStrategy::StaleEvict {
            max_age: Duration::from_millis(100),
        });
        list.enqueue(Entry::aged(1, Duration::from_secs(5)), CommandStrategy::Plain);
        assert_eq!(list.len(), 1);

        list.enqueue(Entry::aged(2, Duration::from_secs(4)), CommandStrategy::Plain);
        list.enqueue(Entry::new(3, ""), CommandStrategy::Plain);
        assert_eq!(drain(&mut list), vec![3]);
    }

    #[test]
    fn test_stale_evict_only_old_prefix() {
        let mut list = CommandList::new();
        list.add_general_strategy(GeneralStrategy::StaleEvict {
            max_age: Duration::from_secs(1),
        });
        list.enqueue(Entry::new(1, ""), CommandStrategy::Plain);
        list.enqueue(Entry::new(2, ""), CommandStrategy::Plain);
        assert_eq!(list.prepare_dequeue().map(|e| e.id), Some(1));
        assert_eq!(list.len(), 2);
    }
}
