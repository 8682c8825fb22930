use std::{
    ffi::{c_int, c_void},
    io,
    os::fd::RawFd,
    time::Duration,
};

use crate::{
    Clock, Error, Grant, IntervalBudget, RealIo, Registry, ShaperOptions, ShaperStats, Shutdown,
    Slice,
};

/// The shaping engine behind the intercepted `socket`, `read` and `close` entry points.
///
/// * `I` provides the real, unshaped primitives.
/// * `C` is the clock used for accounting and pacing.
///
/// All state is owned here and safe to share between threads: every entry point takes `&self`.
/// Shaping never changes the success/failure contract of the real primitives. If anything goes
/// wrong on the shaping side, the call degrades to an unshaped one.
///
/// Under [`AllotmentPolicy::FixedSlice`](crate::AllotmentPolicy::FixedSlice), shaped reads from
/// different threads take turns: each turn lasts until the end of the current interval. With
/// many concurrent readers a read can wait several intervals before its turn comes up.
#[derive(Debug)]
pub struct Shaper<I, C> {
    io: I,
    clock: C,
    options: ShaperOptions,
    registry: Registry,
    budget: IntervalBudget,
    stats: ShaperStats,
    shutdown: Shutdown,
}

impl<I: RealIo, C: Clock> Shaper<I, C> {
    /// Creates a new shaper, starting the first interval now.
    pub fn new(io: I, clock: C, options: ShaperOptions) -> Result<Self, Error> {
        options.validate()?;

        let now = clock.now_micros()?;
        let budget = IntervalBudget::new(&options, now);

        tracing::debug!(
            byte_limit = options.byte_limit,
            interval = options.interval,
            family = options.family,
            allotment = budget.allotment(),
            policy = ?options.policy,
            "shaper initialized"
        );

        Ok(Self {
            io,
            clock,
            registry: Registry::new(options.family),
            options,
            budget,
            stats: ShaperStats::default(),
            shutdown: Shutdown::new(),
        })
    }

    /// Creates a socket through the real primitive and starts shaping it if `domain` is the
    /// shaped family.
    pub fn socket(&self, domain: c_int, ty: c_int, protocol: c_int) -> io::Result<RawFd> {
        tracing::debug!(domain, ty, protocol, "socket");

        let fd = self.io.socket(domain, ty, protocol)?;

        if self.registry.register(fd, domain) {
            self.stats.increment_shaped_sockets();
            tracing::debug!(fd, "shaping new socket");
        }

        Ok(fd)
    }

    /// Reads from `fd`. Unshaped descriptors go straight to the real primitive; shaped ones get
    /// a capped read size followed by a pacing wait.
    ///
    /// # Safety
    ///
    /// `buf` must be valid for writes of `count` bytes.
    pub unsafe fn read(&self, fd: RawFd, buf: *mut c_void, count: usize) -> io::Result<usize> {
        tracing::trace!(fd, count, "read");

        if !self.registry.is_registered(fd) || self.shutdown.is_triggered() {
            self.stats.increment_passthrough_reads();
            return self.io.read(fd, buf, count);
        }

        self.read_shaped(fd, buf, count)
    }

    /// Stops shaping `fd` and closes it through the real primitive.
    pub fn close(&self, fd: RawFd) -> io::Result<()> {
        tracing::debug!(fd, "close");

        if self.registry.unregister(fd) {
            tracing::debug!(fd, "removed shaped socket");
        }

        self.io.close(fd)
    }

    unsafe fn read_shaped(&self, fd: RawFd, buf: *mut c_void, count: usize) -> io::Result<usize> {
        let Some(slice) = self.acquire(count) else {
            return self.io.read(fd, buf, count);
        };

        tracing::debug!(fd, count, allowed = slice.size, window = ?slice.window, "shaped read");

        // SAFETY: `slice.size <= count`, so `buf` is valid for the smaller read too.
        let result = self.io.read(fd, buf, slice.size);

        match &result {
            Ok(n) => {
                self.budget.settle(&slice, Some(*n));
                self.stats.increment_shaped_reads(*n);
            }
            Err(e) => {
                self.budget.settle(&slice, None);

                if e.raw_os_error() == Some(libc::EBADF) {
                    self.registry.unregister(fd);
                    tracing::debug!(fd, "bad descriptor, no longer shaped");
                    return result;
                }
            }
        }

        if slice.pace {
            self.pace(slice.window);
        }

        result
    }

    /// Obtains a read slice from the budget, waiting out windows that are exhausted or already
    /// granted to another reader. Returns `None` if the read has to go through unshaped.
    fn acquire(&self, count: usize) -> Option<Slice> {
        loop {
            let now = match self.clock.now_micros() {
                Ok(now) => now,
                Err(e) => {
                    tracing::warn!(?e, "clock failed, reading unshaped");
                    self.stats.increment_clock_fallbacks();
                    return None;
                }
            };

            match self.budget.begin(now, count) {
                Grant::Read(slice) => return Some(slice),
                Grant::Wait(window) => {
                    tracing::debug!(?window, "budget taken, waiting for next window");
                    self.clock.pause(window, &self.shutdown);
                    self.stats.increment_paced(window.as_micros() as u64);

                    if self.shutdown.is_triggered() {
                        return None;
                    }
                }
            }
        }
    }

    fn pace(&self, window: Duration) {
        tracing::debug!(?window, "pacing");

        self.clock.pause(window, &self.shutdown);
        self.stats.increment_paced(window.as_micros() as u64);

        match self.clock.now_micros() {
            Ok(now) => self.budget.restamp(now),
            Err(e) => tracing::warn!(?e, "clock failed after pacing"),
        }
    }

    /// Wakes every thread in a pacing wait and turns all further reads into pass-through reads.
    pub fn shutdown(&self) {
        tracing::debug!("shutting down, pacing disabled");
        self.shutdown.trigger();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_triggered()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn budget(&self) -> &IntervalBudget {
        &self.budget
    }

    pub fn stats(&self) -> &ShaperStats {
        &self.stats
    }

    pub fn options(&self) -> &ShaperOptions {
        &self.options
    }

    pub fn io(&self) -> &I {
        &self.io
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}
