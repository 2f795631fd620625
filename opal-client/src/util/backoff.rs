/*
    Copyright 2025 MydriaTech AB

    Licensed under the Apache License 2.0 with Free world makers exception
    1.0.0 (the "License"); you may not use this file except in compliance with
    the License. You should have obtained a copy of the License with the source
    or binary distribution in file named

        LICENSE-Apache-2.0-with-FWM-Exception-1.0.0

    Unless required by applicable law or agreed to in writing, software
    distributed under the License is distributed on an "AS IS" BASIS,
    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
    See the License for the specific language governing permissions and
    limitations under the License.
*/

//! Exponential backoff with jitter for reconnect loops.

use tokio::time::Duration;

/// Exponential backoff with jitter.
///
/// Delays double from the base until the cap. The jitter (up to a quarter of
/// the current delay) is derived from the wall clock so that a herd of
/// clients restarted together spreads out without a PRNG dependency.
pub struct ExponentialBackoff {
    base_millis: u64,
    max_millis: u64,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Return a new instance.
    pub fn new(base_millis: u64, max_millis: u64) -> Self {
        Self {
            base_millis: base_millis.max(1),
            max_millis: max_millis.max(base_millis.max(1)),
            attempt: 0,
        }
    }

    /// Return the next delay and advance the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self
            .base_millis
            .saturating_mul(1u64 << self.attempt.min(20))
            .min(self.max_millis);
        self.attempt = self.attempt.saturating_add(1);
        let jitter = crate::time::get_timestamp_micros() % (exp / 4).max(1);
        Duration::from_millis(exp + jitter)
    }

    /// Reset after a successful attempt.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_to_the_cap() {
        let mut backoff = ExponentialBackoff::new(100, 1_000);
        let first = backoff.next_delay();
        assert!(first >= Duration::from_millis(100));
        assert!(first <= Duration::from_millis(125));
        for _ in 0..10 {
            backoff.next_delay();
        }
        let capped = backoff.next_delay();
        assert!(capped >= Duration::from_millis(1_000));
        assert!(capped <= Duration::from_millis(1_250));
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let mut backoff = ExponentialBackoff::new(100, 1_000);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert!(backoff.next_delay() <= Duration::from_millis(125));
    }
}
