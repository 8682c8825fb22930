//! Preloadable read shaper.
//!
//! Loaded with `LD_PRELOAD`, this library takes the place of the C runtime's `socket`, `read`
//! and `close`. Reads on `AF_INET` sockets (or whatever `SHAPER_FAMILY` says) are throttled to
//! `SHAPER_READ_LIMIT` bytes per second; every other descriptor is left alone.
//!
//! ```sh
//! LD_PRELOAD=target/release/libshaper.so SHAPER_READ_LIMIT=2048 SHAPER_DEBUG_LEVEL=2 \
//!     curl -o /dev/null http://example.com/large-file
//! ```
//!
//! See [`config`] for all variables.
#![cfg(target_os = "linux")]

use std::{
    cell::Cell,
    ffi::{c_int, c_void},
    io,
    os::fd::RawFd,
    sync::LazyLock,
};

use shaper_core::{MonotonicClock, RealIo, Shaper};

pub mod config;
pub mod log;
pub mod sys;

use config::Config;
use sys::{LibcIo, SyscallIo};

/// The process-wide interposer, set up when the library is loaded.
static INTERPOSER: LazyLock<Interposer> = LazyLock::new(Interposer::attach);

thread_local! {
    /// Set while this thread is inside one of the entry points.
    static ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Forces the interposer as soon as the library is loaded.
#[used]
#[cfg_attr(not(test), link_section = ".init_array")]
static ATTACH: extern "C" fn() = attach;

extern "C" fn attach() {
    if let Some(_guard) = ReentrancyGuard::enter() {
        LazyLock::force(&INTERPOSER);
    }
}

enum Interposer {
    Shaping(Shaper<LibcIo, MonotonicClock>),
    /// Interception is disabled: every call goes straight to the kernel.
    Passthrough(SyscallIo),
}

impl Interposer {
    fn attach() -> Self {
        let config = Config::from_env();
        log::init(config.verbosity);

        for error in &config.errors {
            tracing::warn!(%error, "ignoring configuration value");
        }

        let io = match LibcIo::resolve() {
            Ok(io) => io,
            Err(e) => {
                tracing::warn!(?e, "failed to resolve real primitives, shaping disabled");
                return Self::Passthrough(SyscallIo);
            }
        };

        match Shaper::new(io, MonotonicClock, config.shaper) {
            Ok(shaper) => Self::Shaping(shaper),
            Err(e) => {
                tracing::warn!(?e, "failed to start shaper, shaping disabled");
                Self::Passthrough(SyscallIo)
            }
        }
    }

    fn socket(&self, domain: c_int, ty: c_int, protocol: c_int) -> io::Result<RawFd> {
        match self {
            Self::Shaping(shaper) => shaper.socket(domain, ty, protocol),
            Self::Passthrough(io) => io.socket(domain, ty, protocol),
        }
    }

    unsafe fn read(&self, fd: RawFd, buf: *mut c_void, count: usize) -> io::Result<usize> {
        match self {
            Self::Shaping(shaper) => shaper.read(fd, buf, count),
            Self::Passthrough(io) => io.read(fd, buf, count),
        }
    }

    fn close(&self, fd: RawFd) -> io::Result<()> {
        match self {
            Self::Shaping(shaper) => shaper.close(fd),
            Self::Passthrough(io) => io.close(fd),
        }
    }
}

/// Marks the current thread as running inside the library. Calls made while it is held (from
/// initialisation, logging or the runtime itself) must not be shaped or re-enter the singleton.
struct ReentrancyGuard;

impl ReentrancyGuard {
    fn enter() -> Option<Self> {
        // Thread-local storage can be gone while the thread is being torn down.
        ACTIVE.try_with(|active| (!active.replace(true)).then_some(Self)).ok().flatten()
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        let _ = ACTIVE.try_with(|active| active.set(false));
    }
}

/// Runs `f` on the process interposer, or on the raw system calls if the library is already
/// running on this thread.
fn dispatch<T>(f: impl FnOnce(&Interposer) -> io::Result<T>) -> io::Result<T> {
    match ReentrancyGuard::enter() {
        Some(_guard) => f(&INTERPOSER),
        None => f(&Interposer::Passthrough(SyscallIo)),
    }
}

/// Hands `err` back to the C caller through `errno`.
fn set_errno(err: &io::Error) {
    let code = err.raw_os_error().unwrap_or(libc::EIO);

    // SAFETY: `__errno_location` always returns a valid pointer to this thread's errno.
    unsafe { *libc::__errno_location() = code };
}

/// # Safety
///
/// Same contract as `socket(2)`.
#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn socket(domain: c_int, ty: c_int, protocol: c_int) -> c_int {
    match dispatch(|interposer| interposer.socket(domain, ty, protocol)) {
        Ok(fd) => fd,
        Err(e) => {
            set_errno(&e);
            -1
        }
    }
}

/// # Safety
///
/// Same contract as `read(2)`: `buf` must be valid for writes of `count` bytes.
#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn read(fd: c_int, buf: *mut c_void, count: libc::size_t) -> libc::ssize_t {
    match dispatch(|interposer| interposer.read(fd, buf, count)) {
        Ok(n) => n as libc::ssize_t,
        Err(e) => {
            set_errno(&e);
            -1
        }
    }
}

/// # Safety
///
/// Same contract as `close(2)`.
#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn close(fd: c_int) -> c_int {
    match dispatch(|interposer| interposer.close(fd)) {
        Ok(()) => 0,
        Err(e) => {
            set_errno(&e);
            -1
        }
    }
}
