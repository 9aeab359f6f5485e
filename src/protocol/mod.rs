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

//! Wire protocol: framing codec, command model and line assembly.

pub mod assembler;
pub mod binary;
pub mod command;
pub mod escaping;

pub use assembler::LineAssembler;
pub use command::{Argument, Queueable, ReceivedCommand, SendCommand};

use serde::{Deserialize, Serialize};

use crate::config::MessengerConfig;
use crate::error::{Error, Result};

/// Register width of the remote board.
///
/// 16-bit boards have no real double, so doubles travel as floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardType {
    #[default]
    Bit16,
    Bit32,
}

impl BoardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoardType::Bit16 => "bit16",
            BoardType::Bit32 => "bit32",
        }
    }
}

/// Framing parameters shared by every component that reads or writes lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    field_separator: char,
    command_separator: char,
    escape_character: char,
    board_type: BoardType,
    remove_empty_fields: bool,
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            field_separator: ',',
            command_separator: ';',
            escape_character: '/',
            board_type: BoardType::Bit16,
            remove_empty_fields: true,
        }
    }
}

impl Codec {
    /// Create a codec with custom control characters.
    pub fn new(field_separator: char, command_separator: char, escape_character: char) -> Result<Self> {
        let chars = [field_separator, command_separator, escape_character];
        for c in chars {
            if c == '\0' || c == '\r' || c == '\n' || u8::try_from(c).is_err() {
                return Err(Error::InvalidSeparators(format!(
                    "{c:?} is not a usable single-byte control character"
                )));
            }
        }
        if field_separator == command_separator
            || field_separator == escape_character
            || command_separator == escape_character
        {
            return Err(Error::InvalidSeparators(format!(
                "field {field_separator:?}, command {command_separator:?} and escape {escape_character:?} must differ"
            )));
        }

        Ok(Self {
            field_separator,
            command_separator,
            escape_character,
            ..Self::default()
        })
    }

    /// Build a codec from the messenger configuration section.
    pub fn from_config(config: &MessengerConfig) -> Result<Self> {
        Ok(Self::new(
            config.field_separator,
            config.command_separator,
            config.escape_character,
        )?
        .with_board_type(config.board_type)
        .with_empty_fields(config.keep_empty_fields))
    }

    pub fn with_board_type(mut self, board_type: BoardType) -> Self {
        self.board_type = board_type;
        self
    }

    /// Keep empty fields when splitting instead of dropping them.
    ///
    /// Dropping is the default because deployed firmware expects it.
    pub fn with_empty_fields(mut self, keep: bool) -> Self {
        self.remove_empty_fields = !keep;
        self
    }

    pub fn field_separator(&self) -> char {
        self.field_separator
    }

    pub fn command_separator(&self) -> char {
        self.command_separator
    }

    pub fn escape_character(&self) -> char {
        self.escape_character
    }

    pub fn board_type(&self) -> BoardType {
        self.board_type
    }

    pub fn removes_empty_fields(&self) -> bool {
        self.remove_empty_fields
    }

    pub fn escape(&self, value: &str) -> String {
        escaping::escape(
            value,
            &[self.field_separator, self.command_separator],
            self.escape_character,
        )
    }

    pub fn unescape(&self, value: &str) -> String {
        escaping::unescape(value, self.escape_character)
    }

    /// Split a line body into its unescaped fields.
    pub fn split_fields(&self, line: &str) -> Vec<String> {
        escaping::split(
            line,
            self.field_separator,
            self.escape_character,
            self.remove_empty_fields,
        )
    }

    /// Drop unescaped command separators from a line.
    pub fn strip_command_separator(&self, line: &str) -> String {
        escaping::remove(line, self.command_separator, self.escape_character)
    }
}
