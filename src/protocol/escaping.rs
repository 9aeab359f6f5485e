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

//! Escape-aware text helpers for the separator based wire format.

/// Tracks escape state while scanning characters left to right.
///
/// An escape character makes the following character non-significant,
/// including a second escape character, which then escapes nothing.
#[derive(Debug, Clone, Copy)]
pub struct EscapeTracker {
    escape: char,
    previous: Option<char>,
}

impl EscapeTracker {
    /// Create a tracker for the given escape character.
    pub fn new(escape: char) -> Self {
        Self {
            escape,
            previous: None,
        }
    }

    /// Feed the next character and report whether it is escaped.
    pub fn is_escaped(&mut self, c: char) -> bool {
        let escaped = self.previous == Some(self.escape);
        self.previous = if escaped && c == self.escape {
            None
        } else {
            Some(c)
        };
        escaped
    }
}

/// Strip every unescaped occurrence of `remove_char`.
///
/// Escaped occurrences are kept together with their escape character.
pub fn remove(input: &str, remove_char: char, escape_char: char) -> String {
    let mut tracker = EscapeTracker::new(escape_char);
    input
        .chars()
        .filter(|&c| {
            let escaped = tracker.is_escaped(c);
            c != remove_char || escaped
        })
        .collect()
}

/// Split `input` on unescaped occurrences of `separator`.
///
/// An escape character and the character after it are consumed as one
/// unit and the escaped character lands literally in the field. A lone
/// escape at the very end is kept as-is. With `remove_empty` set, empty
/// fields are dropped.
pub fn split(input: &str, separator: char, escape_char: char, remove_empty: bool) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        if c == escape_char {
            field.push(chars.next().unwrap_or(c));
        } else if c == separator {
            push_field(&mut fields, std::mem::take(&mut field), remove_empty);
        } else {
            field.push(c);
        }
    }
    push_field(&mut fields, field, remove_empty);

    fields
}

fn push_field(fields: &mut Vec<String>, field: String, remove_empty: bool) {
    if !(remove_empty && field.is_empty()) {
        fields.push(field);
    }
}

/// Prefix every reserved character (and NUL) with `escape_char`.
pub fn escape(value: &str, reserved: &[char], escape_char: char) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == escape_char || c == '\0' || reserved.contains(&c) {
            escaped.push(escape_char);
        }
        escaped.push(c);
    }
    escaped
}

/// Inverse of [`escape`].
pub fn unescape(value: &str, escape_char: char) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == escape_char {
            unescaped.push(chars.next().unwrap_or(c));
        } else {
            unescaped.push(c);
        }
    }
    unescaped
}

/// Encode text as Latin-1, replacing unmappable characters with `?`.
pub fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars().map(|c| u8::try_from(c).unwrap_or(b'?')).collect()
}

/// Decode Latin-1 bytes, one character per byte.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}
