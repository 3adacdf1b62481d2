//! Timing policies for the two supervisors.
//!
//! Durations are (de)serialized as whole milliseconds under `*_ms` keys, so
//! a config file reads `{ "interval_ms": 600000, "retry_delay_ms": 5000 }`.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Shortest delay either supervisor will sleep for.
///
/// A zero delay would turn a failing refresh or connect into a busy loop.
pub const MIN_DELAY: Duration = Duration::from_millis(10);

/// Whole milliseconds of `d`, saturating at `u64::MAX`.
pub(crate) fn saturating_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn saturating_micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

fn at_least_min(name: &'static str, value: Duration) -> Duration {
    if value < MIN_DELAY {
        warn!(
            field = name,
            value_ms = saturating_millis(value),
            min_ms = saturating_millis(MIN_DELAY),
            "delay below minimum, clamping"
        );
        MIN_DELAY
    } else {
        value
    }
}

// ---------------------------------------------------------------------------
// RefreshPolicy
// ---------------------------------------------------------------------------

/// When the refresh supervisor calls `refresh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
    /// Time between a token becoming current and its scheduled refresh.
    ///
    /// Default: 10 minutes.
    #[serde(rename = "interval_ms", with = "millis")]
    pub interval: Duration,

    /// Time before retrying a failed refresh.
    ///
    /// Default: 5 seconds.
    #[serde(rename = "retry_delay_ms", with = "millis")]
    pub retry_delay: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10 * 60),
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl RefreshPolicy {
    pub fn new(interval: Duration, retry_delay: Duration) -> Self {
        Self {
            interval,
            retry_delay,
        }
    }

    /// Clamps delays below [`MIN_DELAY`]. Called by the supervisor on spawn.
    pub fn validated(self) -> Self {
        Self {
            interval: at_least_min("interval", self.interval),
            retry_delay: at_least_min("retry_delay", self.retry_delay),
        }
    }
}

// ---------------------------------------------------------------------------
// ReconnectPolicy
// ---------------------------------------------------------------------------

/// When the connection supervisor reopens a failed socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Time before reopening after a failure. Default: 3 seconds.
    #[serde(rename = "retry_delay_ms", with = "millis")]
    pub retry_delay: Duration,

    /// Upper bound of a random extra delay added to each retry, so many
    /// clients dropped by the same server restart don't all come back in
    /// the same instant. Default: zero.
    #[serde(rename = "jitter_ms", with = "millis")]
    pub jitter: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(3),
            jitter: Duration::ZERO,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(retry_delay: Duration) -> Self {
        Self {
            retry_delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Clamps `retry_delay` below [`MIN_DELAY`]. Jitter may be zero.
    pub fn validated(self) -> Self {
        Self {
            retry_delay: at_least_min("retry_delay", self.retry_delay),
            jitter: self.jitter,
        }
    }

    /// The delay before the next attempt: `retry_delay` plus `0..jitter`.
    pub fn next_delay(&self) -> Duration {
        let jitter_us = saturating_micros(self.jitter);
        if jitter_us == 0 {
            return self.retry_delay;
        }
        let extra = rand::rng().random_range(0..jitter_us);
        self.retry_delay.saturating_add(Duration::from_micros(extra))
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(super::saturating_millis(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
