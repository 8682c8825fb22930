use std::time::Duration;

use parking_lot::Mutex;

use crate::{AllotmentPolicy, ShaperOptions};

/// Mutable accounting state, shared between every shaped read.
#[derive(Debug)]
struct BudgetState {
    /// Bytes left in the current interval. Can go negative, and is only ever restored by an
    /// interval reset.
    bytes_remaining: i64,
    /// Timestamp of the last accounting pass, in microseconds. With
    /// [`AllotmentPolicy::TokenBucket`] this is the start of the current window instead.
    last_accounted: u64,
    /// With [`AllotmentPolicy::FixedSlice`], no slice is handed out before this timestamp: the
    /// end of the window of the last slice granted.
    next_slice: u64,
}

/// The outcome of [`IntervalBudget::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    /// The read may go ahead with the given slice.
    Read(Slice),
    /// The budget of the current window is exhausted: wait for the given duration, then ask again.
    Wait(Duration),
}

/// A read permission handed out by the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    /// The number of bytes the read may request.
    pub size: usize,
    /// Time left until the end of the current interval.
    pub window: Duration,
    /// Whether the caller must be paused for `window` once the read completes.
    pub pace: bool,
    /// Bytes taken from the budget up-front, refunded on settle if not read.
    reserved: usize,
}

/// Tracks the byte budget of the current interval and decides how big each shaped read may be
/// and how long it must be paced for.
///
/// With [`AllotmentPolicy::FixedSlice`] one slice is granted per window, whichever thread asks
/// for it. Readers that arrive while a window is taken are told to wait for its end, so
/// concurrent readers queue up behind each other and share one allotment per interval.
///
/// The lock only covers the bookkeeping: it is never held across the real read or the pacing
/// wait, so a reader blocked on an idle socket does not stall the others.
#[derive(Debug)]
pub struct IntervalBudget {
    byte_limit: i64,
    /// Interval length in microseconds.
    interval: u64,
    allotment: usize,
    policy: AllotmentPolicy,
    state: Mutex<BudgetState>,
}

impl IntervalBudget {
    /// Creates a new budget, starting a fresh interval at `now` (microseconds).
    pub fn new(options: &ShaperOptions, now: u64) -> Self {
        let byte_limit = i64::try_from(options.byte_limit).unwrap_or(i64::MAX);

        Self {
            byte_limit,
            interval: options.interval,
            allotment: options.allotment(),
            policy: options.policy,
            state: Mutex::new(BudgetState {
                bytes_remaining: byte_limit,
                last_accounted: now,
                next_slice: 0,
            }),
        }
    }

    /// Accounts for a read of `requested` bytes starting at `now`.
    ///
    /// Starts a new interval with a full budget if at least one interval has elapsed since the
    /// last accounting pass.
    pub fn begin(&self, now: u64, requested: usize) -> Grant {
        let mut state = self.state.lock();

        if self.policy == AllotmentPolicy::FixedSlice && now < state.next_slice {
            return Grant::Wait(Duration::from_micros(state.next_slice - now));
        }

        let mut elapsed = now.saturating_sub(state.last_accounted);
        if elapsed >= self.interval {
            tracing::debug!(elapsed, "end of interval, resetting budget");

            state.bytes_remaining = self.byte_limit;
            elapsed = 0;

            if self.policy == AllotmentPolicy::TokenBucket {
                state.last_accounted = now;
            }
        }

        let remaining = self.interval - elapsed;
        let window = Duration::from_micros(remaining);

        match self.policy {
            AllotmentPolicy::FixedSlice => {
                state.next_slice = now.saturating_add(remaining);

                let size = requested.min(self.allotment);
                Grant::Read(Slice { size, window, pace: true, reserved: 0 })
            }
            AllotmentPolicy::TokenBucket => {
                let available = usize::try_from(state.bytes_remaining.max(0)).unwrap_or(usize::MAX);
                if available == 0 && requested > 0 {
                    return Grant::Wait(window);
                }

                let size = requested.min(available);
                state.bytes_remaining -= size as i64;

                Grant::Read(Slice { size, window, pace: false, reserved: size })
            }
        }
    }

    /// Settles a slice once its read has completed. `read` is the number of bytes actually
    /// read, or `None` if the read failed.
    pub fn settle(&self, slice: &Slice, read: Option<usize>) {
        let read = read.unwrap_or(0) as i64;
        let mut state = self.state.lock();

        match self.policy {
            AllotmentPolicy::FixedSlice => {
                state.bytes_remaining = state.bytes_remaining.saturating_sub(read);
            }
            AllotmentPolicy::TokenBucket => {
                let unused = (slice.reserved as i64 - read).max(0);
                state.bytes_remaining = state.bytes_remaining.saturating_add(unused);
            }
        }
    }

    /// Records `now` as the time of the last accounting pass. Only meaningful for
    /// [`AllotmentPolicy::FixedSlice`], where intervals are measured from the last paced read.
    pub fn restamp(&self, now: u64) {
        if self.policy == AllotmentPolicy::FixedSlice {
            self.state.lock().last_accounted = now;
        }
    }

    /// Bytes left in the current interval.
    pub fn remaining(&self) -> i64 {
        self.state.lock().bytes_remaining
    }

    pub fn last_accounted(&self) -> u64 {
        self.state.lock().last_accounted
    }

    pub fn allotment(&self) -> usize {
        self.allotment
    }

    pub fn policy(&self) -> AllotmentPolicy {
        self.policy
    }
}
