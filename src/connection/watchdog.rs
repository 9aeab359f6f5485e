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

//! Liveness check for an established connection.

use std::time::{Duration, Instant};

/// What the manager should do after a watchdog check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Next check not due yet.
    Idle,
    /// Traffic seen since the last check.
    Healthy,
    /// Silence; send an identify probe. `attempt` counts from 1.
    Probe { attempt: u32 },
    /// Probes exhausted; the connection is dead.
    Expired,
}

/// Tracks traffic deadlines and probe attempts.
#[derive(Debug, Clone)]
pub struct Watchdog {
    timeout: Duration,
    retry_timeout: Duration,
    max_tries: u32,
    last_check: Instant,
    next_check: Instant,
    tries: u32,
}

impl Watchdog {
    pub fn new(timeout: Duration, retry_timeout: Duration, max_tries: u32) -> Self {
        let now = Instant::now();
        Self {
            timeout,
            retry_timeout,
            max_tries,
            last_check: now,
            next_check: now + timeout,
            tries: 0,
        }
    }

    /// Start watching from `now`.
    pub fn arm(&mut self, now: Instant) {
        self.last_check = now;
        self.next_check = now + self.timeout;
        self.tries = 0;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    pub fn tries(&self) -> u32 {
        self.tries
    }

    /// Evaluate the link at `now` given when the last line arrived.
    pub fn check(&mut self, now: Instant, last_line: Option<Instant>) -> WatchdogAction {
        if now < self.next_check {
            return WatchdogAction::Idle;
        }

        if last_line.is_some_and(|t| t >= self.last_check) {
            self.arm(now);
            return WatchdogAction::Healthy;
        }

        if self.tries >= self.max_tries {
            self.tries = 0;
            return WatchdogAction::Expired;
        }

        self.tries += 1;
        self.last_check = now;
        self.next_check = now + self.retry_timeout;
        WatchdogAction::Probe {
            attempt: self.tries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(3000);
    const RETRY: Duration = Duration::from_millis(1500);

    fn armed(start: Instant) -> Watchdog {
        let mut watchdog = Watchdog::new(TIMEOUT, RETRY, 3);
        watchdog.arm(start);
        watchdog
    }

    #[test]
    fn test_idle_before_deadline() {
        let start = Instant::now();
        let mut watchdog = armed(start);
        assert_eq!(
            watchdog.check(start + Duration::from_millis(100), None),
            WatchdogAction::Idle
        );
    }

    #[test]
    fn test_traffic_resets_deadline() {
        let start = Instant::now();
        let mut watchdog = armed(start);

        let line = start + Duration::from_millis(2000);
        let due = start + TIMEOUT;
        assert_eq!(watchdog.check(due, Some(line)), WatchdogAction::Healthy);
        assert_eq!(
            watchdog.check(due + Duration::from_millis(10), Some(line)),
            WatchdogAction::Idle
        );
        assert_eq!(watchdog.tries(), 0);
    }

    #[test]
    fn test_silence_probes_then_expires() {
        let line = Instant::now();
        let start = line + Duration::from_millis(10);
        let mut watchdog = armed(start);
        let old_line = Some(line);

        let mut now = start + TIMEOUT;
        for attempt in 1..=3 {
            assert_eq!(
                watchdog.check(now, old_line),
                WatchdogAction::Probe { attempt }
            );
            assert_eq!(
                watchdog.check(now + RETRY / 2, old_line),
                WatchdogAction::Idle
            );
            now += RETRY;
        }
        assert_eq!(watchdog.check(now, old_line), WatchdogAction::Expired);
        assert_eq!(watchdog.tries(), 0);
    }

    #[test]
    fn test_reply_to_probe_recovers() {
        let start = Instant::now();
        let mut watchdog = armed(start);

        let probe_at = start + TIMEOUT;
        assert_eq!(
            watchdog.check(probe_at, None),
            WatchdogAction::Probe { attempt: 1 }
        );
        let reply = probe_at + Duration::from_millis(20);
        assert_eq!(
            watchdog.check(probe_at + RETRY, Some(reply)),
            WatchdogAction::Healthy
        );
        assert_eq!(watchdog.tries(), 0);
    }
}
