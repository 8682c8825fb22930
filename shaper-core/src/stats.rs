use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Statistics for a shaper.
/// These are shared between every thread going through the intercepted entry points.
#[derive(Debug, Default)]
pub struct ShaperStats {
    /// Total sockets created with the shaped family
    shaped_sockets: AtomicUsize,
    /// Total reads on unshaped descriptors
    passthrough_reads: AtomicUsize,
    /// Total reads on shaped descriptors
    shaped_reads: AtomicUsize,
    /// Total bytes delivered by shaped reads
    shaped_bytes: AtomicU64,
    /// Total time spent in pacing waits, in microseconds
    paced_micros: AtomicU64,
    /// Total shaped reads that fell back to pass-through after a clock failure
    clock_fallbacks: AtomicUsize,
}

impl ShaperStats {
    #[inline]
    pub(crate) fn increment_shaped_sockets(&self) {
        self.shaped_sockets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_passthrough_reads(&self) {
        self.passthrough_reads.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_shaped_reads(&self, bytes: usize) {
        self.shaped_reads.fetch_add(1, Ordering::Relaxed);
        self.shaped_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_paced(&self, micros: u64) {
        self.paced_micros.fetch_add(micros, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_clock_fallbacks(&self) {
        self.clock_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn shaped_sockets(&self) -> usize {
        self.shaped_sockets.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn passthrough_reads(&self) -> usize {
        self.passthrough_reads.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn shaped_reads(&self) -> usize {
        self.shaped_reads.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn shaped_bytes(&self) -> u64 {
        self.shaped_bytes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn paced_micros(&self) -> u64 {
        self.paced_micros.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn clock_fallbacks(&self) -> usize {
        self.clock_fallbacks.load(Ordering::Relaxed)
    }
}
