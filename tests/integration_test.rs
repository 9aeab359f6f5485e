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

//! Integration tests for the messenger over an in-memory transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use cmdmessenger::config::MessengerConfig;
use cmdmessenger::transport::LoopbackTransport;
use cmdmessenger::{CmdMessenger, MessengerEvent, ReceivedCommand, SendCommand};

fn connected_messenger() -> (Arc<LoopbackTransport>, CmdMessenger) {
    let transport = Arc::new(LoopbackTransport::new());
    let messenger = CmdMessenger::new(transport.clone(), &MessengerConfig::default()).unwrap();
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
fn test_acknowledged_round_trip() {
    let (transport, messenger) = connected_messenger();
    transport.set_responder(|written| written.starts_with(b"5,").then(|| b"6,42;".to_vec()));

    let command = SendCommand::with_ack(5, 6, Duration::from_millis(500)).with_argument(7i16);
    let mut reply = messenger.send_command(command).unwrap();

    assert!(reply.ok());
    assert_eq!(reply.id(), 6);
    assert_eq!(reply.read_i32_arg(), 42);
    assert_eq!(transport.written_text(), "5,7;");
}

#[test]
fn test_acknowledge_timeout_resumes_dispatch() {
    let (transport, messenger) = connected_messenger();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    messenger.attach(7, move |_: &mut ReceivedCommand| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let started = Instant::now();
    let reply = messenger
        .send_command(SendCommand::with_ack(5, 6, Duration::from_millis(100)))
        .unwrap();
    let elapsed = started.elapsed();

    assert!(!reply.ok());
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(1000), "took {:?}", elapsed);

    transport.inject(b"7;");
    assert!(wait_until(|| hits.load(Ordering::SeqCst) == 1));
}

#[test]
fn test_unrelated_command_during_wait_is_dispatched_later() {
    let (transport, messenger) = connected_messenger();
    transport.set_responder(|written| written.starts_with(b"5").then(|| b"9,early;6;".to_vec()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    messenger.attach(9, move |command: &mut ReceivedCommand| {
        sink.lock().push(command.read_string_arg());
    });

    let reply = messenger
        .send_command(SendCommand::with_ack(5, 6, Duration::from_millis(500)))
        .unwrap();
    assert_eq!(reply.id(), 6);
    assert!(wait_until(|| seen.lock().len() == 1));
    assert_eq!(seen.lock()[0], "early");
}

#[test]
fn test_partial_lines_dispatch_once() {
    let (transport, messenger) = connected_messenger();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    messenger.attach(1, move |command: &mut ReceivedCommand| {
        sink.lock().push(command.read_i32_arg());
    });
    let fallback = Arc::new(AtomicUsize::new(0));
    let counter = fallback.clone();
    messenger.attach_default(move |_: &mut ReceivedCommand| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    transport.inject(b"1,12");
    transport.inject(b"3;2,x;");
    transport.inject(b"garbage;");

    assert!(wait_until(|| fallback.load(Ordering::SeqCst) == 1));
    assert!(wait_until(|| seen.lock().len() == 1));
    assert_eq!(*seen.lock(), vec![123]);
    assert!(messenger.last_received_command_timestamp().is_some());
}

#[test]
fn test_escaped_text_arguments() {
    let (transport, messenger) = connected_messenger();
    messenger
        .send_command(SendCommand::new(3).with_argument("a,b;c"))
        .unwrap();
    assert_eq!(transport.written_text(), "3,a/,b/;c;");

    let seen = Arc::new(Mutex::new(String::new()));
    let sink = seen.clone();
    messenger.attach(3, move |command: &mut ReceivedCommand| {
        *sink.lock() = command.read_string_arg();
    });
    transport.inject(b"3,a/,b/;c;");
    assert!(wait_until(|| seen.lock().as_str() == "a,b;c"));
}

#[test]
fn test_binary_argument_survives_the_wire() {
    let (transport, messenger) = connected_messenger();
    // Echo every write straight back.
    transport.set_responder(|written| Some(written.to_vec()));
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    messenger.attach(4, move |command: &mut ReceivedCommand| {
        *sink.lock() = Some((command.read_bin_f32_arg(), command.read_bin_i16_arg()));
    });

    messenger
        .send_command(
            SendCommand::new(4)
                .with_bin_argument(1.5f32)
                .with_bin_argument(-300i16),
        )
        .unwrap();

    assert!(wait_until(|| seen.lock().is_some()));
    assert_eq!(*seen.lock(), Some((1.5, -300)));
}

#[test]
fn test_events_report_traffic() {
    let (transport, messenger) = connected_messenger();
    let events = messenger.events();

    messenger.send_command(SendCommand::new(2)).unwrap();
    transport.inject(b"8,hello;");

    assert!(wait_until(|| events.len() >= 2));
    let mut sent = Vec::new();
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            MessengerEvent::LineSent(line) => sent.push(line),
            MessengerEvent::LineReceived(command) => received.push(command.id()),
        }
    }
    assert_eq!(sent, vec!["2;".to_string()]);
    assert_eq!(received, vec![8]);
}

#[test]
fn test_write_without_connection_is_absorbed() {
    let transport = Arc::new(LoopbackTransport::new());
    let messenger = CmdMessenger::new(transport.clone(), &MessengerConfig::default()).unwrap();
    assert!(!messenger.is_connected());

    let reply = messenger.send_command(SendCommand::new(1)).unwrap();
    assert!(!reply.ok());
    assert!(transport.writes().is_empty());
    messenger.stop();
}
