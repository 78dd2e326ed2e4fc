//! Single-timestamp updates on a path or an open descriptor.

use std::ffi::CStr;
use std::os::fd::RawFd;

#[cfg(not(target_os = "macos"))]
use super::errno::Errno;
use super::errno::{Result, cvt};

/// Seconds and nanoseconds since the epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    /// Leave the timestamp untouched.
    pub const OMIT: Timespec = Timespec {
        sec: 0,
        nsec: libc::UTIME_OMIT as i64,
    };

    /// Set the timestamp to the current time.
    pub const NOW: Timespec = Timespec {
        sec: 0,
        nsec: libc::UTIME_NOW as i64,
    };

    pub const fn new(sec: i64, nsec: i64) -> Self {
        Timespec { sec, nsec }
    }

    pub(crate) fn to_libc(self) -> libc::timespec {
        libc::timespec {
            tv_sec: self.sec as libc::time_t,
            tv_nsec: self.nsec as _,
        }
    }
}

/// The timestamps a file can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeKind {
    Access,
    Modify,
    Create,
    Change,
    Backup,
}

/// Set one timestamp of `path`, never following a trailing symlink.
pub(crate) fn set_path_time(path: &CStr, kind: TimeKind, time: Timespec) -> Result<()> {
    #[cfg(target_os = "macos")]
    {
        attrlist::set_path(path, kind, time)
    }

    #[cfg(not(target_os = "macos"))]
    {
        let times = paired(kind, time)?;
        cvt(unsafe {
            libc::utimensat(
                libc::AT_FDCWD,
                path.as_ptr(),
                times.as_ptr(),
                libc::AT_SYMLINK_NOFOLLOW,
            )
        })
        .map(drop)
    }
}

/// Set one timestamp of the file behind `fd`.
pub(crate) fn set_fd_time(fd: RawFd, kind: TimeKind, time: Timespec) -> Result<()> {
    #[cfg(target_os = "macos")]
    {
        attrlist::set_fd(fd, kind, time)
    }

    #[cfg(not(target_os = "macos"))]
    {
        let times = paired(kind, time)?;
        cvt(unsafe { libc::futimens(fd, times.as_ptr()) }).map(drop)
    }
}

/// Set access and modification time of `path` in one call.
pub(crate) fn set_path_times(path: &CStr, atime: Timespec, mtime: Timespec) -> Result<()> {
    let times = [atime.to_libc(), mtime.to_libc()];
    cvt(unsafe {
        libc::utimensat(
            libc::AT_FDCWD,
            path.as_ptr(),
            times.as_ptr(),
            libc::AT_SYMLINK_NOFOLLOW,
        )
    })
    .map(drop)
}

/// Backup time of `path`; hosts without one report zero.
pub(crate) fn backup_time(path: &CStr) -> Result<Timespec> {
    #[cfg(target_os = "macos")]
    {
        attrlist::get_path(path, TimeKind::Backup)
    }

    #[cfg(not(target_os = "macos"))]
    {
        let _ = path;
        Ok(Timespec::default())
    }
}

// utimensat only knows access and modification time; the other one is omitted.
#[cfg(not(target_os = "macos"))]
fn paired(kind: TimeKind, time: Timespec) -> Result<[libc::timespec; 2]> {
    match kind {
        TimeKind::Access => Ok([time.to_libc(), Timespec::OMIT.to_libc()]),
        TimeKind::Modify => Ok([Timespec::OMIT.to_libc(), time.to_libc()]),
        TimeKind::Create | TimeKind::Change | TimeKind::Backup => Err(Errno::not_supported()),
    }
}

#[cfg(target_os = "macos")]
mod attrlist {
    use std::ffi::CStr;
    use std::os::fd::RawFd;

    use super::{Result, TimeKind, Timespec, cvt};

    fn common_attr(kind: TimeKind) -> libc::attrgroup_t {
        match kind {
            TimeKind::Access => libc::ATTR_CMN_ACCTIME,
            TimeKind::Modify => libc::ATTR_CMN_MODTIME,
            TimeKind::Create => libc::ATTR_CMN_CRTIME,
            TimeKind::Change => libc::ATTR_CMN_CHGTIME,
            TimeKind::Backup => libc::ATTR_CMN_BKUPTIME,
        }
    }

    fn attr_list(kind: TimeKind) -> libc::attrlist {
        let mut list: libc::attrlist = unsafe { std::mem::zeroed() };
        list.bitmapcount = libc::ATTR_BIT_MAP_COUNT;
        list.commonattr = common_attr(kind);
        list
    }

    pub(super) fn set_path(path: &CStr, kind: TimeKind, time: Timespec) -> Result<()> {
        let mut list = attr_list(kind);
        let mut value = time.to_libc();
        cvt(unsafe {
            libc::setattrlist(
                path.as_ptr(),
                &mut list as *mut libc::attrlist as *mut libc::c_void,
                &mut value as *mut libc::timespec as *mut libc::c_void,
                std::mem::size_of::<libc::timespec>(),
                libc::FSOPT_NOFOLLOW,
            )
        })
        .map(drop)
    }

    #[repr(C, packed(4))]
    struct TimeReply {
        length: u32,
        time: libc::timespec,
    }

    pub(super) fn get_path(path: &CStr, kind: TimeKind) -> Result<Timespec> {
        let mut list = attr_list(kind);
        let mut reply: TimeReply = unsafe { std::mem::zeroed() };
        cvt(unsafe {
            libc::getattrlist(
                path.as_ptr(),
                &mut list as *mut libc::attrlist as *mut libc::c_void,
                &mut reply as *mut TimeReply as *mut libc::c_void,
                std::mem::size_of::<TimeReply>(),
                libc::FSOPT_NOFOLLOW,
            )
        })?;
        let time = reply.time;
        Ok(Timespec::new(time.tv_sec as i64, time.tv_nsec as i64))
    }

    pub(super) fn set_fd(fd: RawFd, kind: TimeKind, time: Timespec) -> Result<()> {
        let mut list = attr_list(kind);
        let mut value = time.to_libc();
        cvt(unsafe {
            libc::fsetattrlist(
                fd,
                &mut list as *mut libc::attrlist as *mut libc::c_void,
                &mut value as *mut libc::timespec as *mut libc::c_void,
                std::mem::size_of::<libc::timespec>(),
                libc::FSOPT_NOFOLLOW,
            )
        })
        .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::MetadataExt;

    fn cpath(p: &std::path::Path) -> std::ffi::CString {
        std::ffi::CString::new(p.as_os_str().as_bytes()).unwrap()
    }

    #[test]
    fn access_time_leaves_modify_time() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        let path = cpath(&file);

        set_path_times(&path, Timespec::new(1_000, 0), Timespec::new(2_000, 0)).unwrap();
        set_path_time(&path, TimeKind::Access, Timespec::new(5_000, 7)).unwrap();

        let md = std::fs::metadata(&file).unwrap();
        assert_eq!(md.atime(), 5_000);
        assert_eq!(md.mtime(), 2_000);
    }

    #[test]
    fn modify_time_through_descriptor() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f");
        let f = std::fs::File::create(&file).unwrap();

        set_fd_time(f.as_raw_fd(), TimeKind::Modify, Timespec::new(123_456, 0)).unwrap();
        assert_eq!(std::fs::metadata(&file).unwrap().mtime(), 123_456);
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn extended_times_are_unsupported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = cpath(tmp.path());
        for kind in [TimeKind::Create, TimeKind::Change, TimeKind::Backup] {
            let err = set_path_time(&path, kind, Timespec::new(1, 0)).unwrap_err();
            assert_eq!(err, Errno::not_supported());
        }
    }
}
