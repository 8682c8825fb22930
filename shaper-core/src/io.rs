use std::{
    ffi::{c_int, c_void},
    io,
    os::fd::RawFd,
};

/// The real, unshaped I/O primitives the [`Shaper`](crate::Shaper) delegates to.
///
/// Errors carry the OS error code of the failed primitive, so it can be handed back to the caller
/// untouched no matter what the shaper does after the call.
pub trait RealIo: Send + Sync + 'static {
    /// Creates a socket, returning its descriptor.
    fn socket(&self, domain: c_int, ty: c_int, protocol: c_int) -> io::Result<RawFd>;

    /// Reads up to `count` bytes from `fd` into `buf`.
    ///
    /// # Safety
    ///
    /// `buf` must be valid for writes of `count` bytes.
    unsafe fn read(&self, fd: RawFd, buf: *mut c_void, count: usize) -> io::Result<usize>;

    /// Closes `fd`.
    fn close(&self, fd: RawFd) -> io::Result<()>;
}
