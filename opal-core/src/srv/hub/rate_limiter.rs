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

//! Per-connection token bucket rate limiting.

use std::sync::Mutex;

/// Token bucket refilled at a fixed rate.
///
/// Parsed from a limit expression like `100/second` or `10/minute`. The
/// bucket starts full; every inbound message takes one token.
pub struct RateLimiter {
    capacity: f64,
    refill_per_micro: f64,
    /// `(tokens, last_refill_micros)`
    state: Mutex<(f64, u64)>,
}

impl RateLimiter {
    /// Parse a `count/period` limit expression. Periods: `second`,
    /// `minute`, `hour`.
    pub fn parse(expression: &str) -> Option<Self> {
        let (count, period) = expression.trim().split_once('/')?;
        let count: f64 = count.trim().parse().ok().filter(|c| *c > 0.0)?;
        let period_micros: f64 = match period.trim().to_lowercase().as_str() {
            "second" | "sec" | "s" => 1_000_000.0,
            "minute" | "min" | "m" => 60_000_000.0,
            "hour" | "h" => 3_600_000_000.0,
            _ => return None,
        };
        Some(Self {
            capacity: count,
            refill_per_micro: count / period_micros,
            state: Mutex::new((count, opal_client::time::get_timestamp_micros())),
        })
    }

    /// Take one token. Return `false` when the bucket is empty.
    pub fn allow(&self) -> bool {
        let now = opal_client::time::get_timestamp_micros();
        let mut state = self.state.lock().unwrap();
        let (tokens, last_refill) = *state;
        let refilled = (tokens + (now.saturating_sub(last_refill)) as f64 * self.refill_per_micro)
            .min(self.capacity);
        if refilled >= 1.0 {
            *state = (refilled - 1.0, now);
            true
        } else {
            *state = (refilled, now);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_count_per_period() {
        assert!(RateLimiter::parse("100/second").is_some());
        assert!(RateLimiter::parse("10 / minute").is_some());
        assert!(RateLimiter::parse("nope").is_none());
        assert!(RateLimiter::parse("0/second").is_none());
        assert!(RateLimiter::parse("5/fortnight").is_none());
    }

    #[test]
    fn bucket_empties_and_refills() {
        let limiter = RateLimiter::parse("2/second").unwrap();
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
        // Force a refill by rewinding the last-refill timestamp.
        {
            let mut state = limiter.state.lock().unwrap();
            state.1 -= 2_000_000;
        }
        assert!(limiter.allow());
    }
}
