use std::io;

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Returns the current `CLOCK_MONOTONIC` reading in microseconds.
///
/// Unlike [`std::time::Instant`], a failing clock read is surfaced to the caller instead of
/// panicking, so code running inside foreign processes can degrade gracefully.
#[inline]
pub fn monotonic_micros() -> io::Result<u64> {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };

    // SAFETY: `ts` is a valid, writable `timespec`.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    let secs = u64::try_from(ts.tv_sec).map_err(|_| io::Error::from(io::ErrorKind::InvalidData))?;
    let nanos =
        u64::try_from(ts.tv_nsec).map_err(|_| io::Error::from(io::ErrorKind::InvalidData))?;

    Ok(secs.saturating_mul(MICROS_PER_SEC).saturating_add(nanos / 1_000))
}

#[allow(non_upper_case_globals)]
pub mod constants {
    pub const KiB: u64 = 1024;
}
