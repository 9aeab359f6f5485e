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

//! Pin selection and pairing attempts for unpaired devices.

use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::transport::DeviceDiscovery;

/// Pins most devices ship with, tried last.
pub const DEFAULT_PINS: [&str; 3] = ["0000", "1111", "1234"];

/// Ordered, de-duplicated pins to try on a device.
///
/// The configured pin comes first, then the one stored from an earlier
/// pairing, then the general list and finally the common defaults.
pub fn pin_candidates(known: Option<&str>, stored: Option<&str>, general: &[String]) -> Vec<String> {
    let mut pins: Vec<String> = Vec::new();
    let ordered = known
        .into_iter()
        .chain(stored)
        .chain(general.iter().map(String::as_str))
        .chain(DEFAULT_PINS);

    for pin in ordered {
        if !pin.is_empty() && !pins.iter().any(|p| p == pin) {
            pins.push(pin.to_string());
        }
    }
    pins
}

/// Try each pin in turn, pausing `backoff` between attempts.
///
/// Returns the pin that worked. Gives up early once `keep_going` says so.
pub fn pair_device(
    discovery: &dyn DeviceDiscovery,
    address: &str,
    candidates: &[String],
    backoff: Duration,
    keep_going: impl Fn() -> bool,
) -> Option<String> {
    for (i, pin) in candidates.iter().enumerate() {
        if i > 0 {
            thread::sleep(backoff);
        }
        if !keep_going() {
            debug!("Pairing with {} abandoned", address);
            return None;
        }

        debug!("Pairing with {}, attempt #{}", address, i + 1);
        if discovery.pair(address, pin) {
            info!("Paired with {}", address);
            return Some(pin.clone());
        }
    }

    debug!("No pin accepted by {}", address);
    None
}
