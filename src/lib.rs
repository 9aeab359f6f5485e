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

//! Host side of the CmdMessenger line protocol.
//!
//! Commands travel as `id,arg1,arg2;` lines over a byte transport such as a
//! Bluetooth serial link. [`CmdMessenger`] frames and queues outgoing
//! commands, dispatches incoming ones to callbacks and supports
//! request/acknowledge round-trips. [`ConnectionManager`] finds the device,
//! checks its identity and watches the link.

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod messenger;
pub mod protocol;
pub mod queue;
pub mod state;
pub mod transport;

pub use config::Config;
pub use connection::{ConnectionManager, DeviceStatus};
pub use error::{Error, Result};
pub use events::{ConnectionEvent, MessengerEvent, ProgressEvent};
pub use messenger::{CmdMessenger, ReceiveQueueState, SendQueueState, UseQueue};
pub use protocol::{BoardType, Codec, ReceivedCommand, SendCommand};
pub use queue::{CommandStrategy, GeneralStrategy};
pub use state::{ConnectionState, Mode};
