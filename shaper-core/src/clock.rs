use std::{io, time::Duration};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to read clock: {0}")]
pub struct ClockError(#[from] pub io::Error);

/// Source of time for the budget tracker, and the way a shaped read waits out its window.
pub trait Clock: Send + Sync + 'static {
    /// A monotonic timestamp, in microseconds.
    fn now_micros(&self) -> Result<u64, ClockError>;

    /// Blocks the calling thread for `duration`, or until `shutdown` is triggered.
    fn pause(&self, duration: Duration, shutdown: &Shutdown);
}

/// The production clock, backed by `CLOCK_MONOTONIC`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    #[inline]
    fn now_micros(&self) -> Result<u64, ClockError> {
        Ok(shaper_common::monotonic_micros()?)
    }

    fn pause(&self, duration: Duration, shutdown: &Shutdown) {
        shutdown.wait_timeout(duration);
    }
}

/// A one-shot signal that interrupts pacing waits.
///
/// Once triggered, every thread blocked in [`Shutdown::wait_timeout`] wakes up and subsequent
/// waits return immediately.
#[derive(Debug, Default)]
pub struct Shutdown {
    triggered: Mutex<bool>,
    cvar: Condvar,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let mut triggered = self.triggered.lock();
        *triggered = true;
        self.cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.triggered.lock()
    }

    /// Waits until either `timeout` has elapsed or the signal is triggered.
    /// Returns `true` if the signal was triggered.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut triggered = self.triggered.lock();
        if *triggered {
            return true;
        }

        // Spurious wakeups are absorbed by re-checking against the deadline.
        let deadline = std::time::Instant::now() + timeout;
        while !*triggered {
            if self.cvar.wait_until(&mut triggered, deadline).timed_out() {
                break;
            }
        }

        *triggered
    }
}
