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

//! Command model: outgoing and incoming messages.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::binary::{self, BinaryValue};
use super::escaping::encode_latin1;
use super::{BoardType, Codec};

/// Common view of queued commands used by queue strategies.
pub trait Queueable {
    fn command_id(&self) -> i32;
    fn timestamp(&self) -> Instant;
}

/// A value that can be appended to a [`SendCommand`].
pub trait Argument: Send + Sync + 'static {
    /// Decimal or plain text form, before escaping.
    fn to_text(&self, board_type: BoardType) -> String;

    /// Raw byte pattern for the binary form.
    fn to_binary(&self, board_type: BoardType) -> Vec<u8>;
}

macro_rules! impl_numeric_argument {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Argument for $ty {
                fn to_text(&self, _board_type: BoardType) -> String {
                    self.to_string()
                }

                fn to_binary(&self, _board_type: BoardType) -> Vec<u8> {
                    BinaryValue::to_bytes(*self)
                }
            }
        )*
    };
}

impl_numeric_argument!(i16, u16, i32, u32, f32);

impl Argument for f64 {
    fn to_text(&self, board_type: BoardType) -> String {
        match board_type {
            BoardType::Bit16 => (*self as f32).to_string(),
            BoardType::Bit32 => self.to_string(),
        }
    }

    fn to_binary(&self, board_type: BoardType) -> Vec<u8> {
        match board_type {
            BoardType::Bit16 => BinaryValue::to_bytes(*self as f32),
            BoardType::Bit32 => BinaryValue::to_bytes(*self),
        }
    }
}

impl Argument for bool {
    fn to_text(&self, _board_type: BoardType) -> String {
        String::from(if *self { "1" } else { "0" })
    }

    fn to_binary(&self, _board_type: BoardType) -> Vec<u8> {
        BinaryValue::to_bytes(*self)
    }
}

impl Argument for String {
    fn to_text(&self, _board_type: BoardType) -> String {
        self.clone()
    }

    fn to_binary(&self, _board_type: BoardType) -> Vec<u8> {
        encode_latin1(self)
    }
}

impl Argument for &'static str {
    fn to_text(&self, _board_type: BoardType) -> String {
        (*self).to_string()
    }

    fn to_binary(&self, _board_type: BoardType) -> Vec<u8> {
        encode_latin1(self)
    }
}

type DeferredArgument = Arc<dyn Fn(BoardType) -> String + Send + Sync>;

/// Outgoing command.
///
/// Arguments are kept as deferred closures and only turned into text when
/// the command is rendered for transmission.
#[derive(Clone)]
pub struct SendCommand {
    id: i32,
    deferred: Vec<DeferredArgument>,
    arguments: Vec<String>,
    requires_ack: bool,
    ack_command_id: i32,
    ack_timeout: Duration,
    timestamp: Instant,
}

impl SendCommand {
    /// Command that is fire-and-forget.
    pub fn new(id: i32) -> Self {
        Self {
            id,
            deferred: Vec::new(),
            arguments: Vec::new(),
            requires_ack: false,
            ack_command_id: 0,
            ack_timeout: Duration::ZERO,
            timestamp: Instant::now(),
        }
    }

    /// Command that waits up to `timeout` for a reply with `ack_command_id`.
    pub fn with_ack(id: i32, ack_command_id: i32, timeout: Duration) -> Self {
        Self {
            requires_ack: true,
            ack_command_id,
            ack_timeout: timeout,
            ..Self::new(id)
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn requires_ack(&self) -> bool {
        self.requires_ack
    }

    pub fn ack_command_id(&self) -> i32 {
        self.ack_command_id
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    /// Arguments as resolved by the last render.
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Append a value in its text form.
    pub fn add_argument<A: Argument>(&mut self, value: A) -> &mut Self {
        self.deferred
            .push(Arc::new(move |board_type| value.to_text(board_type)));
        self
    }

    /// Append a value in its binary form.
    pub fn add_bin_argument<A: Argument>(&mut self, value: A) -> &mut Self {
        self.deferred.push(Arc::new(move |board_type| {
            binary::bytes_to_text(&value.to_binary(board_type))
        }));
        self
    }

    /// Append an argument computed at transmission time.
    pub fn add_deferred_argument<F>(&mut self, producer: F) -> &mut Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.deferred.push(Arc::new(move |_| producer()));
        self
    }

    pub fn with_argument<A: Argument>(mut self, value: A) -> Self {
        self.add_argument(value);
        self
    }

    pub fn with_bin_argument<A: Argument>(mut self, value: A) -> Self {
        self.add_bin_argument(value);
        self
    }

    /// Evaluate every deferred argument.
    pub fn init_arguments(&mut self, board_type: BoardType) {
        self.arguments = self
            .deferred
            .iter()
            .map(|argument| argument(board_type))
            .collect();
    }

    /// Resolve arguments and render the framed line, terminator included.
    pub fn command_string(&mut self, codec: &Codec) -> String {
        self.init_arguments(codec.board_type());

        let mut line = self.id.to_string();
        for argument in &self.arguments {
            line.push(codec.field_separator());
            line.push_str(&codec.escape(argument));
        }
        line.push(codec.command_separator());
        line
    }
}

impl fmt::Debug for SendCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendCommand")
            .field("id", &self.id)
            .field("arguments", &self.deferred.len())
            .field("requires_ack", &self.requires_ack)
            .field("ack_command_id", &self.ack_command_id)
            .field("ack_timeout", &self.ack_timeout)
            .finish()
    }
}

impl Queueable for SendCommand {
    fn command_id(&self) -> i32 {
        self.id
    }

    fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

/// Incoming command parsed from one wire line.
///
/// Arguments are read sequentially. A successful read consumes the current
/// argument; a failed read leaves it in place so it can be read again with
/// a different type. Failed numeric reads return zero.
#[derive(Debug, Clone)]
pub struct ReceivedCommand {
    id: i32,
    arguments: Vec<String>,
    raw: String,
    timestamp: Instant,
    board_type: BoardType,
    parameter: Option<usize>,
    dumped: bool,
}

impl ReceivedCommand {
    /// An invalid command, as returned by an acknowledge timeout.
    pub fn empty() -> Self {
        Self {
            id: -1,
            arguments: Vec::new(),
            raw: String::new(),
            timestamp: Instant::now(),
            board_type: BoardType::default(),
            parameter: None,
            dumped: true,
        }
    }

    /// Parse a line body with its terminator already removed.
    ///
    /// A line without a numeric leading field yields an invalid command.
    pub fn parse(line: &str, codec: &Codec) -> Self {
        let mut fields = codec.split_fields(line).into_iter();
        let id = fields.next().and_then(|field| field.trim().parse::<i32>().ok());

        let mut command = Self {
            raw: line.to_string(),
            board_type: codec.board_type(),
            ..Self::empty()
        };
        if let Some(id) = id {
            command.id = id;
            command.arguments = fields.collect();
        }
        command
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Whether the command carries a valid id.
    pub fn ok(&self) -> bool {
        self.id >= 0
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.arguments.get(index).map(String::as_str)
    }

    pub fn raw_string(&self) -> &str {
        &self.raw
    }

    /// Move to the next argument if the current one has been consumed.
    ///
    /// Returns whether an unread argument is available.
    pub fn next(&mut self) -> bool {
        if !self.dumped {
            return true;
        }
        let candidate = self.parameter.map_or(0, |p| p + 1);
        if candidate < self.arguments.len() {
            self.parameter = Some(candidate);
            self.dumped = false;
            true
        } else {
            false
        }
    }

    /// Whether another argument can be read.
    pub fn available(&mut self) -> bool {
        self.next()
    }

    fn current(&self) -> Option<&str> {
        self.parameter.and_then(|p| self.arg(p))
    }

    fn read_with<T>(&mut self, decode: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        if !self.next() {
            return None;
        }
        let value = self.current().and_then(decode)?;
        self.dumped = true;
        Some(value)
    }

    fn read_parsed<T: FromStr>(&mut self) -> Option<T> {
        self.read_with(|field| field.parse().ok())
    }

    fn read_binary<T: BinaryValue>(&mut self) -> Option<T> {
        self.read_with(binary::decode::<T>)
    }

    pub fn read_i16_arg(&mut self) -> i16 {
        self.read_parsed().unwrap_or(0)
    }

    pub fn read_u16_arg(&mut self) -> u16 {
        self.read_parsed().unwrap_or(0)
    }

    pub fn read_i32_arg(&mut self) -> i32 {
        self.read_parsed().unwrap_or(0)
    }

    pub fn read_u32_arg(&mut self) -> u32 {
        self.read_parsed().unwrap_or(0)
    }

    pub fn read_f32_arg(&mut self) -> f32 {
        self.read_parsed().unwrap_or(0.0)
    }

    /// Read a double; on 16-bit boards the text holds float precision.
    pub fn read_f64_arg(&mut self) -> f64 {
        match self.board_type {
            BoardType::Bit16 => self.read_parsed::<f32>().map_or(0.0, f64::from),
            BoardType::Bit32 => self.read_parsed().unwrap_or(0.0),
        }
    }

    /// Zero is false, any other integer is true.
    /// Any non-zero integer is true.
    pub fn read_bool_arg(&mut self) -> bool {
        self.read_parsed::<i64>().is_some_and(|value| value != 0)
    }

    pub fn read_string_arg(&mut self) -> String {
        self.read_with(|field| Some(field.to_string()))
            .unwrap_or_default()
    }

    pub fn read_bin_i16_arg(&mut self) -> i16 {
        self.read_binary().unwrap_or(0)
    }

    pub fn read_bin_u16_arg(&mut self) -> u16 {
        self.read_binary().unwrap_or(0)
    }

    pub fn read_bin_i32_arg(&mut self) -> i32 {
        self.read_binary().unwrap_or(0)
    }

    pub fn read_bin_u32_arg(&mut self) -> u32 {
        self.read_binary().unwrap_or(0)
    }

    pub fn read_bin_f32_arg(&mut self) -> f32 {
        self.read_binary().unwrap_or(0.0)
    }

    pub fn read_bin_f64_arg(&mut self) -> f64 {
        match self.board_type {
            BoardType::Bit16 => self.read_binary::<f32>().map_or(0.0, f64::from),
            BoardType::Bit32 => self.read_binary().unwrap_or(0.0),
        }
    }

    pub fn read_bin_bool_arg(&mut self) -> bool {
        self.read_binary().unwrap_or(false)
    }

    /// Binary strings are plain fields once framing is undone.
    pub fn read_bin_string_arg(&mut self) -> String {
        self.read_string_arg()
    }
}

impl Queueable for ReceivedCommand {
    fn command_id(&self) -> i32 {
        self.id
    }

    fn timestamp(&self) -> Instant {
        self.timestamp
    }
}
