//! Passthrough dispatcher.
//!
//! Every request names a path relative to the mount root and, for requests on
//! open files, the handle slot filled in by `open`, `create` or `opendir`. Each
//! operation performs its native call on the backing tree, logs one trace
//! record and hands back a [`Result`] whose error side is the native errno.

use std::ffi::{CStr, CString, OsStr};
use std::fmt;
use std::fs::File;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, FromRawFd};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

pub mod config;
pub mod dir_cursor;
pub mod errno;
pub mod handle;
pub mod setattr;
pub mod timestamp;

pub use config::{Capabilities, Config, ConfigError};
pub use dir_cursor::{DirCursor, EntryAttr};
pub use errno::{Errno, IntoReply, Result, translate};
pub use setattr::{SetAttrMask, SetAttrRequest};
pub use timestamp::{TimeKind, Timespec};

use errno::{cvt, cvt_size};
use handle::{Handle, HandleTable};
use setattr::{FdSetter, PathSetter};

use crate::util::flags::{AccessModeDisplay, FlockOpDisplay, OpenFlagsDisplay, lock_cmd_name};

pub type FileStat = libc::stat;
pub type StatVfs = libc::statvfs;

/// Reply of the extended-attribute queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XattrData {
    /// A zero-sized query: the buffer size the caller needs.
    Size(usize),
    Data(Vec<u8>),
}

/// Timestamps only some hosts keep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XTimes {
    pub crtime: Timespec,
    pub bkuptime: Timespec,
}

fn trace<T>(op: &str, res: Result<T>, args: fmt::Arguments<'_>) -> Result<T> {
    match &res {
        Ok(_) => info!("{op}({args}) = 0"),
        Err(e) => info!("{op}({args}) = {} {e}", e.reply_code()),
    }
    res
}

/// Log the outcome of one operation and pass it through.
macro_rules! traced {
    ($op:literal, $res:expr, $($arg:tt)*) => {
        trace($op, $res, format_args!($($arg)*))
    };
}

fn lstat(path: &CStr) -> Result<FileStat> {
    let mut st = MaybeUninit::<FileStat>::zeroed();
    cvt(unsafe { libc::lstat(path.as_ptr(), st.as_mut_ptr()) })?;
    Ok(unsafe { st.assume_init() })
}

fn fstat(file: &File) -> Result<FileStat> {
    let mut st = MaybeUninit::<FileStat>::zeroed();
    cvt(unsafe { libc::fstat(file.as_raw_fd(), st.as_mut_ptr()) })?;
    Ok(unsafe { st.assume_init() })
}

fn open_file(path: &CStr, flags: i32, mode: u32) -> Result<File> {
    let fd = cvt(unsafe {
        libc::open(
            path.as_ptr(),
            flags | libc::O_CLOEXEC,
            mode as libc::c_uint,
        )
    })?;
    Ok(unsafe { File::from_raw_fd(fd) })
}

fn c_name(name: &OsStr) -> Result<CString> {
    CString::new(name.as_bytes()).map_err(|_| Errno::invalid())
}

/// Forwards filesystem requests to a directory on the host.
pub struct Passthrough {
    root: PathBuf,
    config: Config,
    handles: HandleTable,
    caps: OnceLock<Capabilities>,
}

impl Passthrough {
    pub fn new(config: Config) -> Self {
        Passthrough {
            root: config.root_dir.clone(),
            handles: HandleTable::new(),
            caps: OnceLock::new(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Capabilities in effect; the configured set until `init` negotiates.
    pub fn capabilities(&self) -> Capabilities {
        self.caps
            .get()
            .copied()
            .unwrap_or_else(|| self.config.capabilities())
    }

    /// Number of open file and directory handles.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn real_path(&self, path: &Path) -> Result<CString> {
        let rel = path.strip_prefix("/").unwrap_or(path);
        let full = if rel.as_os_str().is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        };
        CString::new(full.into_os_string().into_vec()).map_err(|_| Errno::invalid())
    }

    fn file_op<T>(&self, fh: u64, f: impl FnOnce(&File) -> Result<T>) -> Result<T> {
        let handle = self.handles.get(fh)?;
        f(handle.as_file()?)
    }

    pub fn init(&self, offered: Capabilities) -> Capabilities {
        let wanted = self.config.capabilities();
        let caps = *self.caps.get_or_init(|| wanted.negotiate(offered));
        info!("init(wanted={wanted:?}, offered={offered:?}) = {caps:?}");
        caps
    }

    pub fn destroy(&self) {
        info!("destroy() open_handles={}", self.handles.len());
    }

    pub fn getattr(&self, path: &Path) -> Result<FileStat> {
        let res = self.real_path(path).and_then(|p| lstat(&p)).map(|mut st| {
            // let the framework's own I/O size apply
            st.st_blksize = 0;
            st
        });
        traced!("getattr", res, "{path:?}")
    }

    pub fn fgetattr(&self, path: &Path, fh: u64) -> Result<FileStat> {
        let res = self.file_op(fh, fstat).map(|mut st| {
            st.st_blksize = 0;
            st
        });
        traced!("fgetattr", res, "{path:?}, fh={fh}")
    }

    /// Target of a symlink, at most `size - 1` bytes of it.
    pub fn readlink(&self, path: &Path, size: usize) -> Result<Vec<u8>> {
        let res = self.real_path(path).and_then(|p| {
            let mut buf = vec![0u8; size.saturating_sub(1)];
            let n = cvt_size(unsafe {
                libc::readlink(p.as_ptr(), buf.as_mut_ptr().cast(), buf.len())
            })?;
            buf.truncate(n);
            Ok(buf)
        });
        traced!("readlink", res, "{path:?}, size={size}")
    }

    pub fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> Result<()> {
        let res = self.real_path(path).and_then(|p| {
            let ret = if mode & libc::S_IFMT as u32 == libc::S_IFIFO as u32 {
                unsafe { libc::mkfifo(p.as_ptr(), mode as libc::mode_t) }
            } else {
                unsafe { libc::mknod(p.as_ptr(), mode as libc::mode_t, rdev as libc::dev_t) }
            };
            cvt(ret).map(drop)
        });
        traced!("mknod", res, "{path:?}, mode={mode:#o}, rdev={rdev}")
    }

    pub fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        let res = self
            .real_path(path)
            .and_then(|p| cvt(unsafe { libc::mkdir(p.as_ptr(), mode as libc::mode_t) }))
            .map(drop);
        traced!("mkdir", res, "{path:?}, mode={mode:#o}")
    }

    pub fn unlink(&self, path: &Path) -> Result<()> {
        let res = self
            .real_path(path)
            .and_then(|p| cvt(unsafe { libc::unlink(p.as_ptr()) }))
            .map(drop);
        traced!("unlink", res, "{path:?}")
    }

    pub fn rmdir(&self, path: &Path) -> Result<()> {
        let res = self
            .real_path(path)
            .and_then(|p| cvt(unsafe { libc::rmdir(p.as_ptr()) }))
            .map(drop);
        traced!("rmdir", res, "{path:?}")
    }

    /// Create `link` pointing at `target`; the target is stored verbatim.
    pub fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        let res = self.real_path(link).and_then(|l| {
            let t = c_name(target.as_os_str())?;
            cvt(unsafe { libc::symlink(t.as_ptr(), l.as_ptr()) }).map(drop)
        });
        traced!("symlink", res, "{target:?}, {link:?}")
    }

    pub fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let res = self.real_path(from).and_then(|f| {
            let t = self.real_path(to)?;
            cvt(unsafe { libc::rename(f.as_ptr(), t.as_ptr()) }).map(drop)
        });
        traced!("rename", res, "{from:?}, {to:?}")
    }

    pub fn link(&self, from: &Path, to: &Path) -> Result<()> {
        let res = self.real_path(from).and_then(|f| {
            let t = self.real_path(to)?;
            cvt(unsafe { libc::link(f.as_ptr(), t.as_ptr()) }).map(drop)
        });
        traced!("link", res, "{from:?}, {to:?}")
    }

    pub fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        let res = self
            .real_path(path)
            .and_then(|p| cvt(unsafe { libc::chmod(p.as_ptr(), mode as libc::mode_t) }))
            .map(drop);
        traced!("chmod", res, "{path:?}, mode={mode:#o}")
    }

    /// `u32::MAX` leaves that id unchanged.
    pub fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        let res = self
            .real_path(path)
            .and_then(|p| cvt(unsafe { libc::lchown(p.as_ptr(), uid, gid) }))
            .map(drop);
        traced!("chown", res, "{path:?}, uid={uid}, gid={gid}")
    }

    pub fn truncate(&self, path: &Path, size: u64) -> Result<()> {
        let res = self.real_path(path).and_then(|p| {
            let size = libc::off_t::try_from(size).map_err(|_| Errno::invalid())?;
            cvt(unsafe { libc::truncate(p.as_ptr(), size) }).map(drop)
        });
        traced!("truncate", res, "{path:?}, size={size}")
    }

    pub fn ftruncate(&self, path: &Path, fh: u64, size: u64) -> Result<()> {
        let res = self.file_op(fh, |f| f.set_len(size).map_err(Errno::from));
        traced!("ftruncate", res, "{path:?}, fh={fh}, size={size}")
    }

    /// Open a file and return the handle slot value for it. Nothing is stored
    /// on failure.
    pub fn open(&self, path: &Path, flags: i32) -> Result<u64> {
        let res = self
            .real_path(path)
            .and_then(|p| open_file(&p, flags, 0))
            .map(|f| self.handles.insert(Handle::File(f)));
        traced!("open", res, "{path:?}, flags={}", OpenFlagsDisplay(flags))
    }

    pub fn create(&self, path: &Path, mode: u32, flags: i32) -> Result<u64> {
        let res = self
            .real_path(path)
            .and_then(|p| open_file(&p, flags | libc::O_CREAT, mode))
            .map(|f| self.handles.insert(Handle::File(f)));
        traced!(
            "create",
            res,
            "{path:?}, mode={mode:#o}, flags={}",
            OpenFlagsDisplay(flags)
        )
    }

    pub fn read(&self, path: &Path, buf: &mut [u8], offset: u64, fh: u64) -> Result<usize> {
        let size = buf.len();
        let res = self.file_op(fh, |f| f.read_at(buf, offset).map_err(Errno::from));
        traced!("read", res, "{path:?}, size={size}, offset={offset}, fh={fh}")
    }

    pub fn write(&self, path: &Path, data: &[u8], offset: u64, fh: u64) -> Result<usize> {
        let res = self.file_op(fh, |f| f.write_at(data, offset).map_err(Errno::from));
        traced!(
            "write",
            res,
            "{path:?}, size={}, offset={offset}, fh={fh}",
            data.len()
        )
    }

    pub fn statfs(&self, path: &Path) -> Result<StatVfs> {
        let res = self.real_path(path).and_then(|p| {
            let mut st = MaybeUninit::<StatVfs>::zeroed();
            cvt(unsafe { libc::statvfs(p.as_ptr(), st.as_mut_ptr()) })?;
            Ok(unsafe { st.assume_init() })
        });
        traced!("statfs", res, "{path:?}")
    }

    /// Run close-time semantics on a duplicate, leaving the handle open.
    pub fn flush(&self, path: &Path, fh: u64) -> Result<()> {
        let res = self.file_op(fh, |f| {
            let dup = cvt(unsafe { libc::dup(f.as_raw_fd()) })?;
            cvt(unsafe { libc::close(dup) }).map(drop)
        });
        traced!("flush", res, "{path:?}, fh={fh}")
    }

    pub fn release(&self, path: &Path, fh: u64) -> Result<()> {
        let res = self.handles.remove(fh);
        traced!("release", res, "{path:?}, fh={fh}")
    }

    pub fn fsync(&self, path: &Path, datasync: bool, fh: u64) -> Result<()> {
        let res = self.file_op(fh, |f| {
            if datasync {
                f.sync_data().map_err(Errno::from)
            } else {
                f.sync_all().map_err(Errno::from)
            }
        });
        traced!("fsync", res, "{path:?}, datasync={datasync}, fh={fh}")
    }

    pub fn setxattr(
        &self,
        path: &Path,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        position: u32,
    ) -> Result<()> {
        let res = self.real_path(path).and_then(|p| {
            let n = c_name(name)?;
            cvt(xattr::set(&p, &n, value, flags, position)).map(drop)
        });
        traced!(
            "setxattr",
            res,
            "{path:?}, {name:?}, size={}, flags={flags:#x}, position={position}",
            value.len()
        )
    }

    pub fn getxattr(&self, path: &Path, name: &OsStr, size: usize) -> Result<XattrData> {
        let res = self.real_path(path).and_then(|p| {
            let n = c_name(name)?;
            if size == 0 {
                let needed = cvt_size(xattr::get(&p, &n, &mut []))?;
                return Ok(XattrData::Size(needed));
            }
            let mut buf = vec![0u8; size];
            let len = cvt_size(xattr::get(&p, &n, &mut buf))?;
            buf.truncate(len);
            Ok(XattrData::Data(buf))
        });
        traced!("getxattr", res, "{path:?}, {name:?}, size={size}")
    }

    pub fn listxattr(&self, path: &Path, size: usize) -> Result<XattrData> {
        let res = self.real_path(path).and_then(|p| {
            if size == 0 {
                let needed = cvt_size(xattr::list(&p, &mut []))?;
                return Ok(XattrData::Size(needed));
            }
            let mut buf = vec![0u8; size];
            let len = cvt_size(xattr::list(&p, &mut buf))?;
            buf.truncate(len);
            Ok(XattrData::Data(buf))
        });
        traced!("listxattr", res, "{path:?}, size={size}")
    }

    pub fn removexattr(&self, path: &Path, name: &OsStr) -> Result<()> {
        let res = self.real_path(path).and_then(|p| {
            let n = c_name(name)?;
            cvt(xattr::remove(&p, &n)).map(drop)
        });
        traced!("removexattr", res, "{path:?}, {name:?}")
    }

    /// Start an enumeration session and return its handle slot value.
    pub fn opendir(&self, path: &Path) -> Result<u64> {
        let res = self
            .real_path(path)
            .and_then(|p| DirCursor::open(&p))
            .map(|cursor| self.handles.insert(Handle::Dir(Mutex::new(cursor))));
        traced!("opendir", res, "{path:?}")
    }

    /// Emit entries from `offset` on until `emit` refuses one or the
    /// directory ends. See [`DirCursor::read`].
    pub fn readdir<F>(&self, path: &Path, fh: u64, offset: i64, emit: F) -> Result<()>
    where
        F: FnMut(&OsStr, &EntryAttr, i64) -> bool,
    {
        let res = self.handles.get(fh).and_then(|h| {
            let mut cursor = h.lock_dir()?;
            cursor.read(offset, emit)
        });
        traced!("readdir", res, "{path:?}, offset={offset}, fh={fh}")
    }

    /// Always succeeds; a bad slot is only logged.
    pub fn releasedir(&self, path: &Path, fh: u64) -> Result<()> {
        if let Err(e) = self.handles.remove(fh) {
            warn!("releasedir {path:?} fh={fh}: {e}");
        }
        traced!("releasedir", Ok(()), "{path:?}, fh={fh}")
    }

    pub fn fsyncdir(&self, path: &Path, datasync: bool, fh: u64) -> Result<()> {
        traced!("fsyncdir", Ok(()), "{path:?}, datasync={datasync}, fh={fh}")
    }

    pub fn access(&self, path: &Path, mask: i32) -> Result<()> {
        let res = self
            .real_path(path)
            .and_then(|p| cvt(unsafe { libc::access(p.as_ptr(), mask) }))
            .map(drop);
        traced!("access", res, "{path:?}, {}", AccessModeDisplay(mask))
    }

    /// POSIX record lock; `F_GETLK` writes the conflicting lock back into
    /// `lock`.
    pub fn lock(&self, path: &Path, fh: u64, cmd: i32, lock: &mut libc::flock) -> Result<()> {
        let res = self.file_op(fh, |f| {
            cvt(unsafe { libc::fcntl(f.as_raw_fd(), cmd, lock as *mut libc::flock) }).map(drop)
        });
        traced!(
            "lock",
            res,
            "{path:?}, fh={fh}, cmd={}, type={}, start={}, len={}",
            lock_cmd_name(cmd),
            lock.l_type,
            lock.l_start,
            lock.l_len
        )
    }

    pub fn flock(&self, path: &Path, fh: u64, op: i32) -> Result<()> {
        let res = self.file_op(fh, |f| cvt(unsafe { libc::flock(f.as_raw_fd(), op) }).map(drop));
        traced!("flock", res, "{path:?}, fh={fh}, {}", FlockOpDisplay(op))
    }

    pub fn utimens(&self, path: &Path, atime: Timespec, mtime: Timespec) -> Result<()> {
        let res = self
            .real_path(path)
            .and_then(|p| timestamp::set_path_times(&p, atime, mtime));
        traced!("utimens", res, "{path:?}, atime={atime:?}, mtime={mtime:?}")
    }

    pub fn ioctl(&self, path: &Path, cmd: u32) -> Result<()> {
        traced!("ioctl", Err(Errno::not_supported()), "{path:?}, cmd={cmd:#x}")
    }

    pub fn poll(&self, path: &Path, fh: u64) -> Result<()> {
        traced!("poll", Err(Errno::not_supported()), "{path:?}, fh={fh}")
    }

    pub fn fallocate(&self, path: &Path, mode: i32, offset: u64, len: u64, fh: u64) -> Result<()> {
        let res = self.file_op(fh, |f| {
            let offset = libc::off_t::try_from(offset).map_err(|_| Errno::invalid())?;
            let len = libc::off_t::try_from(len).map_err(|_| Errno::invalid())?;
            alloc::fallocate(f, mode, offset, len)
        });
        traced!(
            "fallocate",
            res,
            "{path:?}, mode={mode:#x}, offset={offset}, len={len}, fh={fh}"
        )
    }

    /// The backing volume is never renamed through the mount.
    pub fn setvolname(&self, name: &OsStr) -> Result<()> {
        traced!("setvolname", Err(Errno::from_raw(libc::EACCES)), "{name:?}")
    }

    /// Atomically swap two paths.
    pub fn exchange(&self, path1: &Path, path2: &Path, options: u64) -> Result<()> {
        let res = self.real_path(path1).and_then(|a| {
            let b = self.real_path(path2)?;
            swap::exchange(&a, &b)
        });
        traced!("exchange", res, "{path1:?}, {path2:?}, options={options:#x}")
    }

    pub fn getxtimes(&self, path: &Path) -> Result<XTimes> {
        let res = self.real_path(path).and_then(|p| {
            let md = std::fs::symlink_metadata(OsStr::from_bytes(p.as_bytes()))?;
            let crtime = match md.created() {
                Ok(t) => t
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| Timespec::new(d.as_secs() as i64, i64::from(d.subsec_nanos())))
                    .unwrap_or_default(),
                Err(_) => Timespec::default(),
            };
            Ok(XTimes {
                crtime,
                bkuptime: timestamp::backup_time(&p)?,
            })
        });
        traced!("getxtimes", res, "{path:?}")
    }

    fn set_single_time(&self, path: &Path, kind: TimeKind, time: Timespec) -> Result<()> {
        let req = SetAttrRequest::new().time(kind, time);
        self.real_path(path)
            .and_then(|p| setattr::apply(&PathSetter::new(&p), self.supported(), &req))
    }

    pub fn setcrtime(&self, path: &Path, time: Timespec) -> Result<()> {
        let res = self.set_single_time(path, TimeKind::Create, time);
        traced!("setcrtime", res, "{path:?}, {time:?}")
    }

    pub fn setchgtime(&self, path: &Path, time: Timespec) -> Result<()> {
        let res = self.set_single_time(path, TimeKind::Change, time);
        traced!("setchgtime", res, "{path:?}, {time:?}")
    }

    pub fn setbkuptime(&self, path: &Path, time: Timespec) -> Result<()> {
        let res = self.set_single_time(path, TimeKind::Backup, time);
        traced!("setbkuptime", res, "{path:?}, {time:?}")
    }

    pub fn chflags(&self, path: &Path, flags: u32) -> Result<()> {
        let req = SetAttrRequest::new().flags(flags);
        let res = self
            .real_path(path)
            .and_then(|p| setattr::apply(&PathSetter::new(&p), self.supported(), &req));
        traced!("chflags", res, "{path:?}, flags={flags:#x}")
    }

    fn supported(&self) -> SetAttrMask {
        SetAttrMask::supported(self.capabilities())
    }

    /// Apply a batched attribute update to a path, stopping at the first
    /// failing field.
    pub fn setattr_x(&self, path: &Path, req: &SetAttrRequest) -> Result<()> {
        let res = self
            .real_path(path)
            .and_then(|p| setattr::apply(&PathSetter::new(&p), self.supported(), req));
        traced!("setattr_x", res, "{path:?}, valid={:?}", req.valid)
    }

    pub fn fsetattr_x(&self, path: &Path, fh: u64, req: &SetAttrRequest) -> Result<()> {
        let res = self.file_op(fh, |f| {
            setattr::apply(&FdSetter::new(f.as_raw_fd()), self.supported(), req)
        });
        traced!("fsetattr_x", res, "{path:?}, fh={fh}, valid={:?}", req.valid)
    }
}

/// Extended attributes on the link itself.
mod xattr {
    use std::ffi::CStr;

    #[cfg(target_os = "macos")]
    pub(super) fn set(path: &CStr, name: &CStr, value: &[u8], flags: i32, position: u32) -> i32 {
        unsafe {
            libc::setxattr(
                path.as_ptr(),
                name.as_ptr(),
                value.as_ptr().cast(),
                value.len(),
                position,
                flags | libc::XATTR_NOFOLLOW,
            )
        }
    }

    #[cfg(not(target_os = "macos"))]
    pub(super) fn set(path: &CStr, name: &CStr, value: &[u8], flags: i32, _position: u32) -> i32 {
        unsafe {
            libc::lsetxattr(
                path.as_ptr(),
                name.as_ptr(),
                value.as_ptr().cast(),
                value.len(),
                flags,
            )
        }
    }

    #[cfg(target_os = "macos")]
    pub(super) fn get(path: &CStr, name: &CStr, buf: &mut [u8]) -> isize {
        unsafe {
            libc::getxattr(
                path.as_ptr(),
                name.as_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                0,
                libc::XATTR_NOFOLLOW,
            )
        }
    }

    #[cfg(not(target_os = "macos"))]
    pub(super) fn get(path: &CStr, name: &CStr, buf: &mut [u8]) -> isize {
        unsafe {
            libc::lgetxattr(
                path.as_ptr(),
                name.as_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
            )
        }
    }

    #[cfg(target_os = "macos")]
    pub(super) fn list(path: &CStr, buf: &mut [u8]) -> isize {
        unsafe {
            libc::listxattr(
                path.as_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                libc::XATTR_NOFOLLOW,
            )
        }
    }

    #[cfg(not(target_os = "macos"))]
    pub(super) fn list(path: &CStr, buf: &mut [u8]) -> isize {
        unsafe { libc::llistxattr(path.as_ptr(), buf.as_mut_ptr().cast(), buf.len()) }
    }

    #[cfg(target_os = "macos")]
    pub(super) fn remove(path: &CStr, name: &CStr) -> i32 {
        unsafe { libc::removexattr(path.as_ptr(), name.as_ptr(), libc::XATTR_NOFOLLOW) }
    }

    #[cfg(not(target_os = "macos"))]
    pub(super) fn remove(path: &CStr, name: &CStr) -> i32 {
        unsafe { libc::lremovexattr(path.as_ptr(), name.as_ptr()) }
    }
}

mod swap {
    use std::ffi::CStr;

    #[cfg(target_os = "macos")]
    use super::errno::cvt;
    use super::errno::{Errno, Result};

    #[cfg(target_os = "macos")]
    pub(super) fn exchange(a: &CStr, b: &CStr) -> Result<()> {
        cvt(unsafe { libc::renamex_np(a.as_ptr(), b.as_ptr(), libc::RENAME_SWAP) }).map(drop)
    }

    #[cfg(not(target_os = "macos"))]
    pub(super) fn exchange(a: &CStr, b: &CStr) -> Result<()> {
        let ret = unsafe {
            libc::syscall(
                libc::SYS_renameat2,
                libc::AT_FDCWD,
                a.as_ptr(),
                libc::AT_FDCWD,
                b.as_ptr(),
                libc::RENAME_EXCHANGE,
            )
        };
        if ret == -1 {
            Err(Errno::last())
        } else {
            Ok(())
        }
    }
}

/// Space preallocation.
mod alloc {
    use std::fs::File;
    use std::os::fd::AsRawFd;

    #[cfg(target_os = "macos")]
    use super::errno::Errno;
    use super::errno::{Result, cvt};

    /// Mode bits understood on hosts with `F_PREALLOCATE`.
    #[cfg(target_os = "macos")]
    pub mod mode {
        pub const PREALLOCATE: i32 = 0x1;
        pub const ALLOCATECONTIG: i32 = 0x2;
        pub const ALLOCATEALL: i32 = 0x4;
        pub const ALLOCATEFROMPEOF: i32 = 0x10;
        pub const ALLOCATEFROMVOL: i32 = 0x20;
    }

    #[cfg(not(target_os = "macos"))]
    pub(super) fn fallocate(
        file: &File,
        mode: i32,
        offset: libc::off_t,
        len: libc::off_t,
    ) -> Result<()> {
        cvt(unsafe { libc::fallocate(file.as_raw_fd(), mode, offset, len) }).map(drop)
    }

    #[cfg(target_os = "macos")]
    pub(super) fn fallocate(
        file: &File,
        mode: i32,
        offset: libc::off_t,
        len: libc::off_t,
    ) -> Result<()> {
        if mode & mode::PREALLOCATE == 0 {
            return Err(Errno::not_supported());
        }
        let mut flags = 0;
        if mode & mode::ALLOCATECONTIG != 0 {
            flags |= libc::F_ALLOCATECONTIG;
        }
        if mode & mode::ALLOCATEALL != 0 {
            flags |= libc::F_ALLOCATEALL;
        }
        let posmode = if mode & mode::ALLOCATEFROMPEOF != 0 {
            libc::F_PEOFPOSMODE
        } else if mode & mode::ALLOCATEFROMVOL != 0 {
            libc::F_VOLPOSMODE
        } else {
            return Err(Errno::invalid());
        };
        let mut store = libc::fstore_t {
            fst_flags: flags as libc::c_uint,
            fst_posmode: posmode,
            fst_offset: offset,
            fst_length: len,
            fst_bytesalloc: 0,
        };
        cvt(unsafe {
            libc::fcntl(
                file.as_raw_fd(),
                libc::F_PREALLOCATE,
                &mut store as *mut libc::fstore_t,
            )
        })
        .map(drop)
    }
}
