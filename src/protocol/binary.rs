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

//! Binary argument encoding.
//!
//! Numeric values travel as their little-endian byte pattern, one Latin-1
//! character per byte. The resulting text is escaped like any other
//! argument, so separators inside the pattern stay unambiguous.

use super::escaping::decode_latin1;

/// A value with a fixed-width raw byte representation.
pub trait BinaryValue: Sized + Copy {
    /// Number of bytes on the wire.
    const WIDTH: usize;

    fn to_bytes(self) -> Vec<u8>;

    /// Decode from the first [`Self::WIDTH`] bytes.
    fn from_bytes(bytes: &[u8]) -> Option<Self>;
}

macro_rules! impl_binary_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl BinaryValue for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn to_bytes(self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }

                fn from_bytes(bytes: &[u8]) -> Option<Self> {
                    let raw = bytes.get(..Self::WIDTH)?;
                    Some(<$ty>::from_le_bytes(raw.try_into().ok()?))
                }
            }
        )*
    };
}

impl_binary_value!(u8, i16, u16, i32, u32, f32, f64);

impl BinaryValue for bool {
    const WIDTH: usize = 1;

    fn to_bytes(self) -> Vec<u8> {
        vec![u8::from(self)]
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.first().map(|&b| b != 0)
    }
}

/// Raw bytes as unescaped wire text.
pub fn bytes_to_text(bytes: &[u8]) -> String {
    decode_latin1(bytes)
}

/// Unescaped wire text back to raw bytes.
///
/// Fails if any character lies outside the single-byte range.
pub fn text_to_bytes(text: &str) -> Option<Vec<u8>> {
    text.chars().map(|c| u8::try_from(c).ok()).collect()
}

/// Decode a value from unescaped wire text.
pub fn decode<T: BinaryValue>(text: &str) -> Option<T> {
    text_to_bytes(text).and_then(|bytes| T::from_bytes(&bytes))
}

/// Encode a value as unescaped wire text.
pub fn encode<T: BinaryValue>(value: T) -> String {
    bytes_to_text(&value.to_bytes())
}
