//! Error translation between native calls and the fuse reply convention.
//!
//! Native calls report failure with a `-1` sentinel and leave the reason in the
//! thread's `errno`. The fuse framework expects the opposite encoding: a
//! non-negative result on success and the negated error code on failure.
//! Every operation of the dispatcher funnels its native outcome through the
//! helpers here so that no operation invents its own failure encoding.

use std::fmt;
use std::io;

use libc::{c_int, ssize_t};

/// A positive platform error code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(c_int);

pub type Result<T> = std::result::Result<T, Errno>;

impl Errno {
    pub const fn from_raw(code: c_int) -> Self {
        Errno(code)
    }

    /// Capture the calling thread's current `errno`.
    pub fn last() -> Self {
        Errno(nix::errno::Errno::last_raw())
    }

    pub const fn raw(self) -> c_int {
        self.0
    }

    /// The value handed back to the framework for this failure.
    pub const fn reply_code(self) -> c_int {
        -self.0
    }

    pub const fn not_supported() -> Self {
        Errno(libc::ENOTSUP)
    }

    pub const fn bad_handle() -> Self {
        Errno(libc::EBADF)
    }

    pub const fn invalid() -> Self {
        Errno(libc::EINVAL)
    }
}

impl fmt::Debug for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", nix::errno::Errno::from_raw(self.0))
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", nix::errno::Errno::from_raw(self.0))
    }
}

impl std::error::Error for Errno {}

impl From<io::Error> for Errno {
    fn from(e: io::Error) -> Self {
        Errno(e.raw_os_error().unwrap_or(libc::EIO))
    }
}

impl From<nix::errno::Errno> for Errno {
    fn from(e: nix::errno::Errno) -> Self {
        Errno(e as c_int)
    }
}

impl From<Errno> for io::Error {
    fn from(e: Errno) -> Self {
        io::Error::from_raw_os_error(e.0)
    }
}

impl From<Errno> for rfuse3::Errno {
    fn from(e: Errno) -> Self {
        rfuse3::Errno::from(e.0)
    }
}

/// Check the outcome of a native call returning `c_int`.
pub(crate) fn cvt(ret: c_int) -> Result<c_int> {
    if ret == -1 { Err(Errno::last()) } else { Ok(ret) }
}

/// Check the outcome of a native call returning a byte count.
pub(crate) fn cvt_size(ret: ssize_t) -> Result<usize> {
    if ret == -1 {
        Err(Errno::last())
    } else {
        Ok(ret as usize)
    }
}

/// Map a raw native result and the errno observed with it onto the fuse
/// convention.
pub fn translate(sys_ret: i64, errno: c_int) -> i64 {
    if sys_ret == -1 {
        -i64::from(errno)
    } else {
        sys_ret
    }
}

/// Collapse a typed dispatcher outcome into the signed integer the framework
/// receives.
pub trait IntoReply {
    fn into_reply(self) -> i64;
}

impl IntoReply for Result<()> {
    fn into_reply(self) -> i64 {
        match self {
            Ok(()) => 0,
            Err(e) => i64::from(e.reply_code()),
        }
    }
}

impl IntoReply for Result<usize> {
    fn into_reply(self) -> i64 {
        match self {
            Ok(n) => n as i64,
            Err(e) => i64::from(e.reply_code()),
        }
    }
}

impl IntoReply for Result<c_int> {
    fn into_reply(self) -> i64 {
        match self {
            Ok(n) => i64::from(n),
            Err(e) => i64::from(e.reply_code()),
        }
    }
}

/// The handle value lives in the framework's slot; the reply itself is zero.
impl IntoReply for Result<u64> {
    fn into_reply(self) -> i64 {
        match self {
            Ok(_) => 0,
            Err(e) => i64::from(e.reply_code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_negated() {
        for code in [libc::ENOENT, libc::EACCES, libc::ENOSPC, libc::ENOTSUP, libc::EIO] {
            assert_eq!(translate(-1, code), -i64::from(code));
            let res: Result<()> = Err(Errno::from_raw(code));
            assert_eq!(res.into_reply(), -i64::from(code));
        }
    }

    #[test]
    fn successes_pass_through() {
        for ret in [0i64, 1, 4096, i64::from(i32::MAX)] {
            // errno is meaningless on success and must be ignored
            assert_eq!(translate(ret, libc::EBADF), ret);
        }
        let read: Result<usize> = Ok(17);
        assert_eq!(read.into_reply(), 17);
        let opened: Result<u64> = Ok(42);
        assert_eq!(opened.into_reply(), 0);
    }

    #[test]
    fn cvt_reads_errno() {
        let path = std::ffi::CString::new("/nonexistent/shimfs/cvt").unwrap();
        let ret = unsafe { libc::access(path.as_ptr(), libc::F_OK) };
        assert_eq!(cvt(ret), Err(Errno::from_raw(libc::ENOENT)));
        assert_eq!(cvt(0), Ok(0));
        assert_eq!(cvt_size(12), Ok(12));
    }

    #[test]
    fn io_error_roundtrip() {
        let e: io::Error = Errno::from_raw(libc::EXDEV).into();
        assert_eq!(e.raw_os_error(), Some(libc::EXDEV));
        let back = Errno::from(e);
        assert_eq!(back.raw(), libc::EXDEV);
        let synthetic = io::Error::other("no code");
        assert_eq!(Errno::from(synthetic).raw(), libc::EIO);
    }
}
