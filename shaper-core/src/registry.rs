use std::{ffi::c_int, os::fd::RawFd};

use parking_lot::RwLock;
use rustc_hash::FxHashSet;

/// The set of descriptors whose reads are shaped.
///
/// A descriptor is a member if it was created with the shaped address family and has not been
/// closed since. Lookups happen on every intercepted read and only take a shared lock.
#[derive(Debug)]
pub struct Registry {
    family: c_int,
    fds: RwLock<FxHashSet<RawFd>>,
}

impl Registry {
    /// Creates an empty registry for sockets of `family`.
    pub fn new(family: c_int) -> Self {
        Self { family, fds: RwLock::new(FxHashSet::default()) }
    }

    /// The shaped address family.
    pub fn family(&self) -> c_int {
        self.family
    }

    /// Adds `fd` if `domain` is the shaped family. Returns `true` if it was newly added.
    pub fn register(&self, fd: RawFd, domain: c_int) -> bool {
        if domain != self.family || fd < 0 {
            return false;
        }

        self.fds.write().insert(fd)
    }

    /// Whether reads on `fd` are shaped.
    #[inline]
    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.fds.read().contains(&fd)
    }

    /// Removes `fd`. Returns `true` if it was a member.
    pub fn unregister(&self, fd: RawFd) -> bool {
        self.fds.write().remove(&fd)
    }

    /// Number of shaped descriptors.
    pub fn len(&self) -> usize {
        self.fds.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.read().is_empty()
    }
}
