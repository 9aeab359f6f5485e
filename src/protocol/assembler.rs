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

//! Line assembly from raw transport bytes.

use tracing::{debug, trace, warn};

use super::command::ReceivedCommand;
use super::escaping::{decode_latin1, EscapeTracker};
use super::Codec;

/// Upper bound for a buffered partial line before it is discarded.
const MAX_BUFFER_LEN: usize = 64 * 1024;

/// Accumulates transport bytes and cuts them into complete command lines.
pub struct LineAssembler {
    codec: Codec,
    buffer: String,
}

impl LineAssembler {
    /// Create a new line assembler.
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            buffer: String::with_capacity(256),
        }
    }

    /// Append newly received bytes and return every completed command.
    ///
    /// Bytes after the last unescaped command separator stay buffered for
    /// the next call.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<ReceivedCommand> {
        self.buffer.push_str(&decode_latin1(bytes));

        let mut commands = Vec::new();
        while let Some(line) = self.next_line() {
            trace!("Assembled line: {:?}", line);
            commands.push(self.parse_line(&line));
        }

        // UTF-8 length is an upper bound on the wire length.
        if self.buffer.len() > MAX_BUFFER_LEN && self.buffered_len() > MAX_BUFFER_LEN {
            warn!(
                "Discarding {} buffered bytes without a command separator",
                self.buffered_len()
            );
            self.buffer.clear();
        }

        if !commands.is_empty() {
            debug!(
                "Assembled {} command(s), {} bytes pending",
                commands.len(),
                self.buffered_len()
            );
        }
        commands
    }

    /// Reset the assembler state.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of wire bytes waiting for a command separator.
    pub fn buffered_len(&self) -> usize {
        // One char per received byte.
        self.buffer.chars().count()
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.find_line_end()?;
        Some(self.buffer.drain(..end).collect())
    }

    /// Byte offset just past the first unescaped command separator.
    fn find_line_end(&self) -> Option<usize> {
        let separator = self.codec.command_separator();
        let mut tracker = EscapeTracker::new(self.codec.escape_character());
        self.buffer
            .char_indices()
            .find(|&(_, c)| {
                let escaped = tracker.is_escaped(c);
                c == separator && !escaped
            })
            .map(|(i, c)| i + c.len_utf8())
    }

    fn parse_line(&self, line: &str) -> ReceivedCommand {
        let body = self.codec.strip_command_separator(line);
        // Only the line ending of the previous command. Trailing bytes may
        // be binary argument data.
        let body = body.trim_start_matches(|c| c == '\r' || c == '\n');
        ReceivedCommand::parse(body, &self.codec)
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new(Codec::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::escaping::encode_latin1;
    use crate::protocol::SendCommand;

    #[test]
    fn test_single_line() {
        let mut assembler = LineAssembler::default();
        let commands = assembler.push(b"4,12,abc;");

        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].id(), 4);
        assert_eq!(commands[0].arguments(), ["12", "abc"]);
        assert_eq!(assembler.buffered_len(), 0);
    }

    #[test]
    fn test_multiple_lines_in_one_delivery() {
        let mut assembler = LineAssembler::default();
        let commands = assembler.push(b"1;2,a;3,b,c;4");

        let ids: Vec<i32> = commands.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(assembler.buffered_len(), 1);

        let commands = assembler.push(b";");
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].id(), 4);
    }

    #[test]
    fn test_partial_line_every_split_point() {
        let line = b"12,first/;arg,-7;";
        for split in 0..=line.len() {
            let mut assembler = LineAssembler::default();
            let mut commands = assembler.push(&line[..split]);
            commands.extend(assembler.push(&line[split..]));

            assert_eq!(commands.len(), 1, "split at {split}");
            assert_eq!(commands[0].id(), 12);
            assert_eq!(commands[0].arguments(), ["first;arg", "-7"]);
        }
    }

    #[test]
    fn test_escaped_escape_before_separator() {
        let mut assembler = LineAssembler::default();
        let commands = assembler.push(b"1,a//;2;");

        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].arguments(), ["a/"]);
        assert_eq!(commands[1].id(), 2);
    }

    #[test]
    fn test_leading_crlf_trimmed() {
        let mut assembler = LineAssembler::default();
        let commands = assembler.push(b"1,x;\r\n2,y;\r\n");

        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].arguments(), ["x"]);
        assert_eq!(commands[1].id(), 2);
        assert_eq!(commands[1].arguments(), ["y"]);
        assert_eq!(assembler.buffered_len(), 2);
    }

    #[test]
    fn test_binary_argument_ending_in_newline_byte() {
        let codec = Codec::default();
        // Little-endian 0x0A00 ends in a line feed byte.
        let mut send = SendCommand::new(1).with_bin_argument(2560u16);
        let mut send_cr = SendCommand::new(2).with_bin_argument(0x0D0Du16);
        let mut wire = encode_latin1(&send.command_string(&codec));
        wire.extend(b"\r\n");
        wire.extend(encode_latin1(&send_cr.command_string(&codec)));

        let mut assembler = LineAssembler::new(codec);
        let mut commands = assembler.push(&wire);

        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].read_bin_u16_arg(), 2560);
        assert_eq!(commands[1].id(), 2);
        assert_eq!(commands[1].read_bin_u16_arg(), 0x0D0D);
    }

    #[test]
    fn test_buffer_limit_counts_wire_bytes() {
        let mut assembler = LineAssembler::default();
        // 0xE9 takes two bytes once decoded into a String.
        let high = vec![0xE9u8; MAX_BUFFER_LEN - 1];
        assert!(assembler.push(&high).is_empty());
        assert_eq!(assembler.buffered_len(), MAX_BUFFER_LEN - 1);

        assembler.push(&[0xE9]);
        assert_eq!(assembler.buffered_len(), MAX_BUFFER_LEN);

        assembler.push(&[0xE9]);
        assert_eq!(assembler.buffered_len(), 0);
    }

    #[test]
    fn test_garbage_line_is_invalid() {
        let mut assembler = LineAssembler::default();
        let commands = assembler.push(b"hello;;");

        assert_eq!(commands.len(), 2);
        assert!(commands.iter().all(|c| !c.ok()));
    }

    #[test]
    fn test_raw_bytes_preserved() {
        let mut assembler = LineAssembler::default();
        let commands = assembler.push(&[b'1', b',', 0xE9, 0xFF, b';']);

        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].arguments()[0], "\u{E9}\u{FF}");
    }

    #[test]
    fn test_reset() {
        let mut assembler = LineAssembler::default();
        assembler.push(b"1,partial");
        assert!(assembler.buffered_len() > 0);
        assembler.reset();
        assert_eq!(assembler.buffered_len(), 0);
    }
}
