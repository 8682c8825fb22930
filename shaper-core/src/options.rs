use std::{ffi::c_int, time::Duration};

use shaper_common::{constants::KiB, MICROS_PER_SEC};
use thiserror::Error;

/// The default byte limit, per second.
pub const DEFAULT_BYTE_LIMIT: u64 = KiB;
/// The default accounting interval, in microseconds.
pub const DEFAULT_INTERVAL_MICROS: u64 = 100_000;
/// The address family shaped by default.
pub const DEFAULT_FAMILY: c_int = libc::AF_INET;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("byte limit must be positive")]
    ZeroByteLimit,
    #[error("interval must be positive")]
    ZeroInterval,
}

/// How large a shaped read may be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AllotmentPolicy {
    /// Every shaped read is capped to the same allotment derived from the configuration,
    /// regardless of how much of the interval budget is left, and is then paced until the end
    /// of the interval. One such read is let through per interval across all threads.
    #[default]
    FixedSlice,
    /// Reads are capped to what is left of the interval budget. Reads are only paced once the
    /// budget of the current window is exhausted.
    TokenBucket,
}

/// Shaper configuration. Build with [`Default`] and the `with_*` setters.
#[derive(Debug, Clone)]
pub struct ShaperOptions {
    /// Bytes per second that shaped descriptors may read, shared between all of them.
    pub byte_limit: u64,
    /// Length of an accounting interval, in microseconds.
    pub interval: u64,
    /// The address family whose sockets get shaped.
    pub family: c_int,
    /// How the budget is handed out to reads.
    pub policy: AllotmentPolicy,
}

impl ShaperOptions {
    /// Sets the byte limit (bytes per second).
    pub fn with_byte_limit(mut self, byte_limit: u64) -> Self {
        self.byte_limit = byte_limit;
        self
    }

    /// Sets the interval length, in microseconds.
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the shaped address family.
    pub fn with_family(mut self, family: c_int) -> Self {
        self.family = family;
        self
    }

    /// Sets the allotment policy.
    pub fn with_policy(mut self, policy: AllotmentPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Checks that the byte limit and the interval are non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.byte_limit == 0 {
            return Err(ConfigError::ZeroByteLimit);
        }

        if self.interval == 0 {
            return Err(ConfigError::ZeroInterval);
        }

        Ok(())
    }

    /// The maximum number of bytes a single shaped read may request: the byte limit spread over
    /// the intervals that fit in one second. Never less than one byte, as a zero-sized read
    /// would look like EOF to the caller.
    pub fn allotment(&self) -> usize {
        let slice = self.byte_limit as u128 * self.interval as u128 / MICROS_PER_SEC as u128;

        usize::try_from(slice).unwrap_or(usize::MAX).max(1)
    }

    /// The interval as a [`Duration`].
    pub fn interval_duration(&self) -> Duration {
        Duration::from_micros(self.interval)
    }
}

impl Default for ShaperOptions {
    fn default() -> Self {
        Self {
            byte_limit: DEFAULT_BYTE_LIMIT,
            interval: DEFAULT_INTERVAL_MICROS,
            family: DEFAULT_FAMILY,
            policy: AllotmentPolicy::default(),
        }
    }
}
