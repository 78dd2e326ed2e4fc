//! Batched attribute updates.
//!
//! A single request can ask for any subset of mode, ownership, size, the five
//! timestamps and the platform file flags. Fields are applied one native call
//! at a time in a fixed order, and the first failure ends the request: the
//! fields before it stay applied, the ones after it are never attempted.

use std::ffi::CStr;
use std::os::fd::RawFd;

use bitflags::bitflags;

use super::config::Capabilities;
use super::errno::{Errno, Result, cvt};
use super::timestamp::{self, TimeKind, Timespec};

bitflags! {
    /// Which fields of a [`SetAttrRequest`] are present.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SetAttrMask: u32 {
        const MODE = 1 << 0;
        const UID = 1 << 1;
        const GID = 1 << 2;
        const SIZE = 1 << 3;
        const ATIME = 1 << 4;
        const MTIME = 1 << 5;
        const CRTIME = 1 << 6;
        const CHGTIME = 1 << 7;
        const BKUPTIME = 1 << 8;
        const FLAGS = 1 << 9;
    }
}

impl SetAttrMask {
    /// Fields the host can apply given the negotiated capabilities.
    pub fn supported(caps: Capabilities) -> Self {
        let mut mask = Self::MODE | Self::UID | Self::GID | Self::SIZE | Self::ATIME | Self::MTIME;
        if cfg!(target_os = "macos") {
            mask |= Self::FLAGS;
            if caps.contains(Capabilities::XTIMES) {
                mask |= Self::CRTIME | Self::CHGTIME | Self::BKUPTIME;
            }
        }
        mask
    }
}

/// One step of the update, in application order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Mode,
    Owner,
    Size,
    Time(TimeKind),
    Flags,
}

const ORDER: [Step; 9] = [
    Step::Mode,
    Step::Owner,
    Step::Size,
    Step::Time(TimeKind::Access),
    Step::Time(TimeKind::Modify),
    Step::Time(TimeKind::Create),
    Step::Time(TimeKind::Change),
    Step::Time(TimeKind::Backup),
    Step::Flags,
];

impl Step {
    fn mask(self) -> SetAttrMask {
        match self {
            Step::Mode => SetAttrMask::MODE,
            Step::Owner => SetAttrMask::UID | SetAttrMask::GID,
            Step::Size => SetAttrMask::SIZE,
            Step::Time(TimeKind::Access) => SetAttrMask::ATIME,
            Step::Time(TimeKind::Modify) => SetAttrMask::MTIME,
            Step::Time(TimeKind::Create) => SetAttrMask::CRTIME,
            Step::Time(TimeKind::Change) => SetAttrMask::CHGTIME,
            Step::Time(TimeKind::Backup) => SetAttrMask::BKUPTIME,
            Step::Flags => SetAttrMask::FLAGS,
        }
    }
}

/// Values for a batched attribute update; only fields named in `valid` are
/// looked at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetAttrRequest {
    pub valid: SetAttrMask,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub crtime: Timespec,
    pub chgtime: Timespec,
    pub bkuptime: Timespec,
    pub flags: u32,
}

impl Default for SetAttrRequest {
    fn default() -> Self {
        SetAttrRequest {
            valid: SetAttrMask::empty(),
            mode: 0,
            uid: 0,
            gid: 0,
            size: 0,
            atime: Timespec::default(),
            mtime: Timespec::default(),
            crtime: Timespec::default(),
            chgtime: Timespec::default(),
            bkuptime: Timespec::default(),
            flags: 0,
        }
    }
}

impl SetAttrRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.valid |= SetAttrMask::MODE;
        self.mode = mode;
        self
    }

    pub fn uid(mut self, uid: u32) -> Self {
        self.valid |= SetAttrMask::UID;
        self.uid = uid;
        self
    }

    pub fn gid(mut self, gid: u32) -> Self {
        self.valid |= SetAttrMask::GID;
        self.gid = gid;
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.valid |= SetAttrMask::SIZE;
        self.size = size;
        self
    }

    pub fn time(mut self, kind: TimeKind, time: Timespec) -> Self {
        let step = Step::Time(kind);
        self.valid |= step.mask();
        match kind {
            TimeKind::Access => self.atime = time,
            TimeKind::Modify => self.mtime = time,
            TimeKind::Create => self.crtime = time,
            TimeKind::Change => self.chgtime = time,
            TimeKind::Backup => self.bkuptime = time,
        }
        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.valid |= SetAttrMask::FLAGS;
        self.flags = flags;
        self
    }

    fn time_of(&self, kind: TimeKind) -> Timespec {
        match kind {
            TimeKind::Access => self.atime,
            TimeKind::Modify => self.mtime,
            TimeKind::Create => self.crtime,
            TimeKind::Change => self.chgtime,
            TimeKind::Backup => self.bkuptime,
        }
    }
}

/// Native primitives used by [`apply`], one per field.
pub trait AttrSetter {
    fn set_mode(&self, mode: u32) -> Result<()>;
    /// `None` leaves that half of the ownership unchanged.
    fn set_owner(&self, uid: Option<u32>, gid: Option<u32>) -> Result<()>;
    fn set_size(&self, size: u64) -> Result<()>;
    fn set_time(&self, kind: TimeKind, time: Timespec) -> Result<()>;
    fn set_flags(&self, flags: u32) -> Result<()>;
}

/// Apply every selected field of `req` through `setter`.
pub fn apply<S: AttrSetter + ?Sized>(
    setter: &S,
    supported: SetAttrMask,
    req: &SetAttrRequest,
) -> Result<()> {
    for step in ORDER {
        let wanted = req.valid & step.mask();
        if wanted.is_empty() {
            continue;
        }
        if !supported.contains(wanted) {
            debug!("setattr {step:?} not supported on this host");
            return Err(Errno::not_supported());
        }

        let res = match step {
            Step::Mode => setter.set_mode(req.mode),
            Step::Owner => setter.set_owner(
                wanted.contains(SetAttrMask::UID).then_some(req.uid),
                wanted.contains(SetAttrMask::GID).then_some(req.gid),
            ),
            Step::Size => setter.set_size(req.size),
            Step::Time(kind) => setter.set_time(kind, req.time_of(kind)),
            Step::Flags => setter.set_flags(req.flags),
        };
        if let Err(e) = res {
            debug!("setattr {step:?} failed: {e}");
            return Err(e);
        }
    }
    Ok(())
}

const UNCHANGED: u32 = u32::MAX;

/// Applies fields to a path without following a trailing symlink.
pub struct PathSetter<'a> {
    path: &'a CStr,
}

impl<'a> PathSetter<'a> {
    pub fn new(path: &'a CStr) -> Self {
        PathSetter { path }
    }
}

impl AttrSetter for PathSetter<'_> {
    #[cfg(target_os = "macos")]
    fn set_mode(&self, mode: u32) -> Result<()> {
        cvt(unsafe { libc::lchmod(self.path.as_ptr(), mode as libc::mode_t) }).map(drop)
    }

    // Linux has no lchmod and symlink permissions are meaningless there.
    #[cfg(not(target_os = "macos"))]
    fn set_mode(&self, mode: u32) -> Result<()> {
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        cvt(unsafe { libc::lstat(self.path.as_ptr(), &mut st) })?;
        if st.st_mode & libc::S_IFMT == libc::S_IFLNK {
            return Err(Errno::not_supported());
        }
        cvt(unsafe { libc::chmod(self.path.as_ptr(), mode as libc::mode_t) }).map(drop)
    }

    fn set_owner(&self, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        cvt(unsafe {
            libc::lchown(
                self.path.as_ptr(),
                uid.unwrap_or(UNCHANGED) as libc::uid_t,
                gid.unwrap_or(UNCHANGED) as libc::gid_t,
            )
        })
        .map(drop)
    }

    fn set_size(&self, size: u64) -> Result<()> {
        let size = libc::off_t::try_from(size).map_err(|_| Errno::invalid())?;
        cvt(unsafe { libc::truncate(self.path.as_ptr(), size) }).map(drop)
    }

    fn set_time(&self, kind: TimeKind, time: Timespec) -> Result<()> {
        timestamp::set_path_time(self.path, kind, time)
    }

    #[cfg(target_os = "macos")]
    fn set_flags(&self, flags: u32) -> Result<()> {
        cvt(unsafe { libc::lchflags(self.path.as_ptr(), flags as _) }).map(drop)
    }

    #[cfg(not(target_os = "macos"))]
    fn set_flags(&self, _flags: u32) -> Result<()> {
        Err(Errno::not_supported())
    }
}

/// Applies fields to an already open descriptor.
pub struct FdSetter {
    fd: RawFd,
}

impl FdSetter {
    pub fn new(fd: RawFd) -> Self {
        FdSetter { fd }
    }
}

impl AttrSetter for FdSetter {
    fn set_mode(&self, mode: u32) -> Result<()> {
        cvt(unsafe { libc::fchmod(self.fd, mode as libc::mode_t) }).map(drop)
    }

    fn set_owner(&self, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        cvt(unsafe {
            libc::fchown(
                self.fd,
                uid.unwrap_or(UNCHANGED) as libc::uid_t,
                gid.unwrap_or(UNCHANGED) as libc::gid_t,
            )
        })
        .map(drop)
    }

    fn set_size(&self, size: u64) -> Result<()> {
        let size = libc::off_t::try_from(size).map_err(|_| Errno::invalid())?;
        cvt(unsafe { libc::ftruncate(self.fd, size) }).map(drop)
    }

    fn set_time(&self, kind: TimeKind, time: Timespec) -> Result<()> {
        timestamp::set_fd_time(self.fd, kind, time)
    }

    #[cfg(target_os = "macos")]
    fn set_flags(&self, flags: u32) -> Result<()> {
        cvt(unsafe { libc::fchflags(self.fd, flags as _) }).map(drop)
    }

    #[cfg(not(target_os = "macos"))]
    fn set_flags(&self, _flags: u32) -> Result<()> {
        Err(Errno::not_supported())
    }
}
