//! Owned-FD wrapper used when building message bodies with `h` arguments.

use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};

/// A Unix file descriptor that has been duplicated on construction, so the
/// original the caller held remains theirs to close. Converting this into a
/// [`crate::Value::Fd`] hands ownership of the duplicate to the message;
/// the transport closes it after sending (or the application closes it after
/// receiving one back).
#[derive(Debug)]
pub struct UnixFd(OwnedFd);

impl UnixFd {
    /// Duplicate any FD-like handle (anything implementing [`AsRawFd`]).
    pub fn new(fd_like: &impl AsRawFd) -> std::io::Result<Self> {
        let raw = fd_like.as_raw_fd();
        let owned = rawfd_dup(raw)?;
        Ok(UnixFd(owned))
    }

    pub fn into_raw_fd(self) -> RawFd {
        std::os::unix::io::IntoRawFd::into_raw_fd(self.0)
    }
}

impl AsRawFd for UnixFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

fn rawfd_dup(fd: RawFd) -> std::io::Result<OwnedFd> {
    use std::os::unix::io::FromRawFd;
    let dup = unsafe { libc_dup(fd) };
    if dup < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(dup) })
}

fn libc_dup(fd: RawFd) -> RawFd {
    // `nix::unistd::dup` wraps the same syscall; used directly here to avoid
    // pulling in a `Result<OwnedFd>`-returning API that isn't present in
    // every `nix` version this crate targets.
    match nix::unistd::dup(fd) {
        Ok(new_fd) => new_fd,
        Err(_) => -1,
    }
}
