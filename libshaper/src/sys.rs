//! The real I/O primitives of the C runtime.

use std::{
    ffi::{c_int, c_void, CStr},
    io,
    os::fd::RawFd,
};

use shaper_core::RealIo;

type SocketFn = unsafe extern "C" fn(c_int, c_int, c_int) -> c_int;
type ReadFn = unsafe extern "C" fn(c_int, *mut c_void, libc::size_t) -> libc::ssize_t;
type CloseFn = unsafe extern "C" fn(c_int) -> c_int;

/// Loaded explicitly when the next object in the lookup order does not provide a symbol.
const LIBC_SONAME: &CStr = c"libc.so.6";

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("symbol `{0}` not found in the C runtime")]
    MissingSymbol(&'static str),
}

/// The primitives the intercepted entry points would have reached without this library.
#[derive(Debug, Clone, Copy)]
pub struct LibcIo {
    socket: SocketFn,
    read: ReadFn,
    close: CloseFn,
}

impl LibcIo {
    /// Resolves `socket`, `read` and `close` from the objects loaded after this one.
    pub fn resolve() -> Result<Self, ResolveError> {
        let socket = lookup(c"socket")?;
        let read = lookup(c"read")?;
        let close = lookup(c"close")?;

        // SAFETY: the symbols are the C runtime's own functions, with these exact signatures.
        unsafe {
            Ok(Self {
                socket: std::mem::transmute::<*mut c_void, SocketFn>(socket),
                read: std::mem::transmute::<*mut c_void, ReadFn>(read),
                close: std::mem::transmute::<*mut c_void, CloseFn>(close),
            })
        }
    }
}

fn lookup(name: &'static CStr) -> Result<*mut c_void, ResolveError> {
    // SAFETY: `name` is NUL-terminated and `RTLD_NEXT` is a valid pseudo-handle.
    let symbol = unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) };
    if !symbol.is_null() {
        return Ok(symbol);
    }

    tracing::debug!(?name, "symbol not found in next object, trying {LIBC_SONAME:?}");

    let missing = || ResolveError::MissingSymbol(name.to_str().unwrap_or("<invalid>"));

    // SAFETY: both strings are NUL-terminated. The handle is never closed, so the resolved
    // symbol stays valid for the lifetime of the process.
    let symbol = unsafe {
        let handle = libc::dlopen(LIBC_SONAME.as_ptr(), libc::RTLD_LAZY);
        if handle.is_null() {
            return Err(missing());
        }

        libc::dlsym(handle, name.as_ptr())
    };

    if symbol.is_null() {
        return Err(missing());
    }

    Ok(symbol)
}

impl RealIo for LibcIo {
    fn socket(&self, domain: c_int, ty: c_int, protocol: c_int) -> io::Result<RawFd> {
        let fd = unsafe { (self.socket)(domain, ty, protocol) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(fd)
    }

    unsafe fn read(&self, fd: RawFd, buf: *mut c_void, count: usize) -> io::Result<usize> {
        let n = (self.read)(fd, buf, count);
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(n as usize)
    }

    fn close(&self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe { (self.close)(fd) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }
}

/// Raw system calls. Always available, whatever the state of symbol resolution, which makes it
/// the fallback when interception is disabled and the path for re-entrant calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyscallIo;

fn check(rc: libc::c_long) -> io::Result<libc::c_long> {
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(rc)
}

impl RealIo for SyscallIo {
    fn socket(&self, domain: c_int, ty: c_int, protocol: c_int) -> io::Result<RawFd> {
        let fd = check(unsafe { libc::syscall(libc::SYS_socket, domain, ty, protocol) })?;
        Ok(fd as RawFd)
    }

    unsafe fn read(&self, fd: RawFd, buf: *mut c_void, count: usize) -> io::Result<usize> {
        let n = check(libc::syscall(libc::SYS_read, fd, buf, count))?;
        Ok(n as usize)
    }

    fn close(&self, fd: RawFd) -> io::Result<()> {
        check(unsafe { libc::syscall(libc::SYS_close, fd) })?;
        Ok(())
    }
}
