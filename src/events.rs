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

//! Events published by the messenger and the connection manager.

use async_channel::{Receiver, Sender, TrySendError};

use crate::protocol::ReceivedCommand;

/// Default number of undelivered events kept per channel.
pub const EVENT_CAPACITY: usize = 256;

/// Events emitted by the messenger.
#[derive(Debug, Clone)]
pub enum MessengerEvent {
    /// A valid command was queued for dispatch.
    LineReceived(ReceivedCommand),
    /// A framed command line was handed to the transport.
    LineSent(String),
}

/// Connection lifecycle events. These are never dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A device answered the identify challenge.
    ConnectionFound { address: String },
    /// The watchdog gave up on a silent device.
    ConnectionTimeout,
}

/// Progress message from the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// 1 is most important, 3 is chatter.
    pub level: u8,
    pub description: String,
}

/// Broadcast-style channel that never blocks the producer.
///
/// A bounded channel drops the oldest undelivered event when nobody keeps
/// up. An unbounded one keeps everything.
pub struct EventChannel<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> EventChannel<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// Channel for rare events that must all be delivered.
    pub fn unbounded() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self { tx, rx }
    }

    /// Publish an event without blocking.
    pub fn emit(&self, event: T) {
        match self.tx.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(event)) => {
                let _ = self.rx.try_recv();
                let _ = self.tx.try_send(event);
            }
        }
    }

    /// Receiver for published events. Receivers share one stream.
    pub fn subscribe(&self) -> Receiver<T> {
        self.rx.clone()
    }
}

impl<T> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_and_receive() {
        let channel = EventChannel::new(4);
        let rx = channel.subscribe();
        channel.emit(ConnectionEvent::ConnectionTimeout);
        assert_eq!(rx.try_recv().ok(), Some(ConnectionEvent::ConnectionTimeout));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_channel_drops_oldest() {
        let channel = EventChannel::new(2);
        let rx = channel.subscribe();
        for level in 1..=3u8 {
            channel.emit(ProgressEvent {
                level,
                description: String::new(),
            });
        }

        let levels: Vec<u8> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|event| event.level)
            .collect();
        assert_eq!(levels, vec![2, 3]);
    }

    #[test]
    fn test_unbounded_channel_keeps_every_event() {
        let channel = EventChannel::unbounded();
        let rx = channel.subscribe();
        channel.emit(ConnectionEvent::ConnectionFound {
            address: "dev".to_string(),
        });
        for _ in 0..(EVENT_CAPACITY * 4) {
            channel.emit(ConnectionEvent::ConnectionTimeout);
        }

        assert_eq!(rx.len(), EVENT_CAPACITY * 4 + 1);
        assert_eq!(
            rx.try_recv().ok(),
            Some(ConnectionEvent::ConnectionFound {
                address: "dev".to_string()
            })
        );
    }
}
