//! rfuse3 front end for the passthrough dispatcher.
//!
//! The kernel addresses files by inode number while the dispatcher works on
//! paths, so every request first goes through the [`InodeTable`]. Entry and
//! attribute replies carry the table's inode numbers. Plain readdir entries
//! carry the table's number when the child is known and the host's `d_ino`
//! otherwise; the kernel only uses that value as a hint.

use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use rfuse3::Result as FuseResult;
use rfuse3::raw::Filesystem;
use rfuse3::raw::Request;
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, FileAttr, ReplyAttr, ReplyCreated, ReplyData,
    ReplyDirectory, ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyLock, ReplyOpen, ReplyStatFs,
    ReplyWrite, ReplyXAttr,
};
use rfuse3::{FileType, SetAttr, Timestamp};

use super::inode_table::{InodeTable, ROOT_INODE};
use crate::passthrough::{
    Capabilities, Errno, FileStat, Passthrough, SetAttrRequest, TimeKind, Timespec, XattrData,
};

const READLINK_SIZE: usize = libc::PATH_MAX as usize + 1;

/// `renameat2` flag asking for an atomic swap, as the kernel sends it.
const RENAME_EXCHANGE: u32 = 1 << 1;

/// Capabilities the rfuse3 session negotiates with the kernel. BSD locks are
/// never enabled, so the kernel keeps `flock` local.
pub fn session_capabilities() -> Capabilities {
    let portable = Capabilities::ASYNC_READ
        | Capabilities::POSIX_LOCKS
        | Capabilities::ATOMIC_O_TRUNC
        | Capabilities::BIG_WRITES;
    if cfg!(target_os = "macos") {
        portable
            | Capabilities::ALLOCATE
            | Capabilities::EXCHANGE_DATA
            | Capabilities::CASE_INSENSITIVE
            | Capabilities::VOL_RENAME
            | Capabilities::XTIMES
    } else {
        portable
    }
}

/// Serves a [`Passthrough`] over the raw fuse protocol.
pub struct FuseBridge {
    fs: Passthrough,
    inodes: InodeTable,
    attr_ttl: Duration,
    entry_ttl: Duration,
    readdir_batch: usize,
    max_write: NonZeroU32,
}

impl FuseBridge {
    pub fn new(fs: Passthrough) -> Self {
        let config = fs.config();
        let attr_ttl = Duration::from_secs(config.attr_timeout_secs);
        let entry_ttl = Duration::from_secs(config.entry_timeout_secs);
        let readdir_batch = config.readdir_batch.max(1);
        let max_write = NonZeroU32::new(config.max_write).unwrap_or(NonZeroU32::MIN);
        FuseBridge {
            fs,
            inodes: InodeTable::new(),
            attr_ttl,
            entry_ttl,
            readdir_batch,
            max_write,
        }
    }

    pub fn passthrough(&self) -> &Passthrough {
        &self.fs
    }

    fn path_of(&self, ino: u64) -> FuseResult<PathBuf> {
        self.inodes.path(ino).ok_or_else(|| libc::ENOENT.into())
    }

    // Handle-based requests only use the path for tracing.
    fn traced_path(&self, ino: u64) -> PathBuf {
        self.inodes.path(ino).unwrap_or_default()
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> FuseResult<PathBuf> {
        self.inodes
            .child_path(parent, name)
            .ok_or_else(|| libc::ENOENT.into())
    }

    fn entry_for(&self, path: &Path) -> FuseResult<ReplyEntry> {
        let st = self.fs.getattr(path)?;
        let ino = self.inodes.lookup(path);
        Ok(ReplyEntry {
            ttl: self.entry_ttl,
            attr: stat_to_attr(&st, ino),
            generation: 0,
        })
    }

    fn stat(&self, path: &Path, fh: Option<u64>) -> FuseResult<FileStat> {
        match fh {
            Some(fh) => match self.fs.fgetattr(path, fh) {
                // directory handles have no file behind them
                Err(e) if e == Errno::bad_handle() => Ok(self.fs.getattr(path)?),
                res => Ok(res?),
            },
            None => Ok(self.fs.getattr(path)?),
        }
    }

    fn rename_entry(
        &self,
        parent: u64,
        name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
    ) -> FuseResult<()> {
        let from = self.child_of(parent, name)?;
        let to = self.child_of(new_parent, new_name)?;
        self.fs.rename(&from, &to)?;
        self.inodes.rename(&from, &to);
        Ok(())
    }

    fn create_entry(
        &self,
        parent: u64,
        name: &OsStr,
        mode: u32,
        flags: u32,
    ) -> FuseResult<ReplyCreated> {
        let path = self.child_of(parent, name)?;
        let fh = self.fs.create(&path, mode, flags as i32)?;
        let st = match self.fs.fgetattr(&path, fh) {
            Ok(st) => st,
            Err(e) => {
                let _ = self.fs.release(&path, fh);
                return Err(e.into());
            }
        };
        let ino = self.inodes.lookup(&path);
        Ok(ReplyCreated {
            ttl: self.entry_ttl,
            attr: stat_to_attr(&st, ino),
            generation: 0,
            fh,
            flags: 0,
        })
    }

    /// One reply's worth of entries, at most `readdir_batch` of them.
    fn dir_entries(&self, ino: u64, fh: u64, offset: i64) -> FuseResult<Vec<DirectoryEntry>> {
        let path = self.traced_path(ino);
        let mut entries = Vec::new();
        self.fs.readdir(&path, fh, offset, |name, attr, next| {
            if entries.len() >= self.readdir_batch {
                return false;
            }
            let inode = if name == "." {
                ino
            } else if name == ".." {
                self.parent_inode(&path)
            } else {
                self.inodes.peek(&path.join(name)).unwrap_or(attr.ino)
            };
            entries.push(DirectoryEntry {
                inode,
                kind: kind_from_mode(attr.mode),
                name: name.to_owned(),
                offset: next,
            });
            true
        })?;
        Ok(entries)
    }

    fn dir_entries_plus(
        &self,
        ino: u64,
        fh: u64,
        offset: i64,
    ) -> FuseResult<Vec<FuseResult<DirectoryEntryPlus>>> {
        let dir = self.path_of(ino)?;
        let mut entries = Vec::new();
        self.fs.readdir(&dir, fh, offset, |name, _, next| {
            if entries.len() >= self.readdir_batch {
                return false;
            }
            // "." and ".." do not count as lookups
            let (path, entry_ino) = if name == "." {
                (dir.clone(), ino)
            } else if name == ".." {
                let parent = dir.parent().map(Path::to_path_buf).unwrap_or_else(|| dir.clone());
                (parent, self.parent_inode(&dir))
            } else {
                let path = dir.join(name);
                match self.fs.getattr(&path) {
                    Ok(st) => {
                        let child = self.inodes.lookup(&path);
                        entries.push(Ok(self.entry_plus(name, next, &st, child)));
                    }
                    // vanished since the stream listed it
                    Err(e) => debug!("readdirplus skips {path:?}: {e}"),
                }
                return true;
            };
            match self.fs.getattr(&path) {
                Ok(st) => entries.push(Ok(self.entry_plus(name, next, &st, entry_ino))),
                Err(e) => entries.push(Err(e.into())),
            }
            true
        })?;
        Ok(entries)
    }

    fn entry_plus(&self, name: &OsStr, offset: i64, st: &FileStat, ino: u64) -> DirectoryEntryPlus {
        DirectoryEntryPlus {
            inode: ino,
            generation: 0,
            kind: kind_from_mode(st.st_mode as u32),
            name: OsString::from(name),
            offset,
            attr: stat_to_attr(st, ino),
            entry_ttl: self.entry_ttl,
            attr_ttl: self.attr_ttl,
        }
    }

    /// Forward a fuse record-lock request to the dispatcher.
    fn posix_lock(
        &self,
        ino: u64,
        fh: u64,
        cmd: i32,
        start: u64,
        end: u64,
        lock_type: u32,
    ) -> FuseResult<ReplyLock> {
        let mut lock = flock_from_range(start, end, lock_type)?;
        self.fs.lock(&self.traced_path(ino), fh, cmd, &mut lock)?;
        Ok(lock_reply(&lock))
    }

    fn parent_inode(&self, path: &Path) -> u64 {
        path.parent()
            .and_then(|p| self.inodes.peek(p))
            .unwrap_or(ROOT_INODE)
    }
}

fn kind_from_mode(mode: u32) -> FileType {
    match mode & libc::S_IFMT as u32 {
        m if m == libc::S_IFDIR as u32 => FileType::Directory,
        m if m == libc::S_IFLNK as u32 => FileType::Symlink,
        m if m == libc::S_IFIFO as u32 => FileType::NamedPipe,
        m if m == libc::S_IFCHR as u32 => FileType::CharDevice,
        m if m == libc::S_IFBLK as u32 => FileType::BlockDevice,
        m if m == libc::S_IFSOCK as u32 => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

fn timestamp(sec: i64, nsec: i64) -> Timestamp {
    Timestamp::new(sec, nsec as u32)
}

/// Convert a host stat record, replacing the host inode with `ino`.
pub(crate) fn stat_to_attr(st: &FileStat, ino: u64) -> FileAttr {
    let mode = st.st_mode as u32;
    FileAttr {
        ino,
        size: st.st_size as u64,
        blocks: st.st_blocks as u64,
        atime: timestamp(st.st_atime as i64, st.st_atime_nsec as i64),
        mtime: timestamp(st.st_mtime as i64, st.st_mtime_nsec as i64),
        ctime: timestamp(st.st_ctime as i64, st.st_ctime_nsec as i64),
        #[cfg(target_os = "macos")]
        crtime: timestamp(st.st_birthtime as i64, st.st_birthtime_nsec as i64),
        kind: kind_from_mode(mode),
        perm: (mode & 0o7777) as u16,
        nlink: st.st_nlink as u32,
        uid: st.st_uid,
        gid: st.st_gid,
        rdev: st.st_rdev as u32,
        #[cfg(target_os = "macos")]
        flags: st.st_flags,
        blksize: st.st_blksize as u32,
    }
}

fn to_timespec(t: Timestamp) -> Timespec {
    Timespec::new(t.sec, i64::from(t.nsec))
}

fn setattr_request(set_attr: &SetAttr) -> SetAttrRequest {
    let mut req = SetAttrRequest::new();
    if let Some(mode) = set_attr.mode {
        req = req.mode(u32::from(mode) & 0o7777);
    }
    if let Some(uid) = set_attr.uid {
        req = req.uid(uid);
    }
    if let Some(gid) = set_attr.gid {
        req = req.gid(gid);
    }
    if let Some(size) = set_attr.size {
        req = req.size(size);
    }
    if let Some(atime) = set_attr.atime {
        req = req.time(TimeKind::Access, to_timespec(atime));
    }
    if let Some(mtime) = set_attr.mtime {
        req = req.time(TimeKind::Modify, to_timespec(mtime));
    }
    #[cfg(target_os = "macos")]
    {
        if let Some(crtime) = set_attr.crtime {
            req = req.time(TimeKind::Create, to_timespec(crtime));
        }
        if let Some(chgtime) = set_attr.chgtime {
            req = req.time(TimeKind::Change, to_timespec(chgtime));
        }
        if let Some(bkuptime) = set_attr.bkuptime {
            req = req.time(TimeKind::Backup, to_timespec(bkuptime));
        }
        if let Some(flags) = set_attr.flags {
            req = req.flags(flags);
        }
    }
    // the host stamps ctime itself on every change
    if let Some(ctime) = set_attr.ctime {
        debug!("setattr ignores requested ctime {}.{:09}", ctime.sec, ctime.nsec);
    }
    req
}

/// Byte range of a fuse lock request as an fcntl record lock. The kernel
/// marks "to end of file" with an end at or past `i64::MAX`.
fn flock_from_range(start: u64, end: u64, lock_type: u32) -> FuseResult<libc::flock> {
    let l_start = libc::off_t::try_from(start).map_err(|_| libc::EINVAL)?;
    let l_len = if end >= i64::MAX as u64 {
        0
    } else if end < start {
        return Err(libc::EINVAL.into());
    } else {
        libc::off_t::try_from(end - start + 1).map_err(|_| libc::EINVAL)?
    };
    let mut lock: libc::flock = unsafe { std::mem::zeroed() };
    lock.l_type = lock_type as _;
    lock.l_whence = libc::SEEK_SET as _;
    lock.l_start = l_start;
    lock.l_len = l_len;
    Ok(lock)
}

fn lock_reply(lock: &libc::flock) -> ReplyLock {
    let start = lock.l_start as u64;
    let end = if lock.l_len == 0 {
        i64::MAX as u64
    } else {
        start + lock.l_len as u64 - 1
    };
    ReplyLock {
        start,
        end,
        r#type: lock.l_type as u32,
        pid: lock.l_pid as u32,
    }
}

fn xattr_reply(data: XattrData) -> ReplyXAttr {
    match data {
        XattrData::Size(n) => ReplyXAttr::Size(n as u32),
        XattrData::Data(v) => ReplyXAttr::Data(Bytes::from(v)),
    }
}

impl Filesystem for FuseBridge {
    type DirEntryStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntry>> + Send + 'a>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntryPlus>> + Send + 'a>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        self.fs.init(session_capabilities());
        Ok(ReplyInit {
            max_write: self.max_write,
        })
    }

    async fn destroy(&self, _req: Request) {
        self.fs.destroy();
    }

    async fn lookup(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        let path = self.child_of(parent, name)?;
        self.entry_for(&path)
    }

    async fn forget(&self, _req: Request, inode: u64, nlookup: u64) {
        self.inodes.forget(inode, nlookup);
    }

    async fn batch_forget(&self, _req: Request, inodes: &[(u64, u64)]) {
        for &(inode, nlookup) in inodes {
            self.inodes.forget(inode, nlookup);
        }
    }

    async fn getattr(
        &self,
        _req: Request,
        ino: u64,
        fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        let path = self.path_of(ino)?;
        let st = self.stat(&path, fh)?;
        Ok(ReplyAttr {
            ttl: self.attr_ttl,
            attr: stat_to_attr(&st, ino),
        })
    }

    async fn setattr(
        &self,
        _req: Request,
        ino: u64,
        fh: Option<u64>,
        set_attr: SetAttr,
    ) -> FuseResult<ReplyAttr> {
        let path = self.path_of(ino)?;
        let req = setattr_request(&set_attr);
        match fh {
            Some(fh) => match self.fs.fsetattr_x(&path, fh, &req) {
                Err(e) if e == Errno::bad_handle() => self.fs.setattr_x(&path, &req)?,
                res => res?,
            },
            None => self.fs.setattr_x(&path, &req)?,
        }
        let st = self.stat(&path, fh)?;
        Ok(ReplyAttr {
            ttl: self.attr_ttl,
            attr: stat_to_attr(&st, ino),
        })
    }

    async fn readlink(&self, _req: Request, ino: u64) -> FuseResult<ReplyData> {
        let path = self.path_of(ino)?;
        let target = self.fs.readlink(&path, READLINK_SIZE)?;
        Ok(ReplyData {
            data: Bytes::from(target),
        })
    }

    async fn symlink(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        link: &OsStr,
    ) -> FuseResult<ReplyEntry> {
        let path = self.child_of(parent, name)?;
        self.fs.symlink(Path::new(link), &path)?;
        self.entry_for(&path)
    }

    async fn mknod(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        rdev: u32,
    ) -> FuseResult<ReplyEntry> {
        let path = self.child_of(parent, name)?;
        self.fs.mknod(&path, mode, u64::from(rdev))?;
        self.entry_for(&path)
    }

    async fn mkdir(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
    ) -> FuseResult<ReplyEntry> {
        let path = self.child_of(parent, name)?;
        self.fs.mkdir(&path, mode & !umask)?;
        self.entry_for(&path)
    }

    async fn unlink(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let path = self.child_of(parent, name)?;
        self.fs.unlink(&path)?;
        self.inodes.unlink(&path);
        Ok(())
    }

    async fn rmdir(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let path = self.child_of(parent, name)?;
        self.fs.rmdir(&path)?;
        self.inodes.unlink(&path);
        Ok(())
    }

    async fn rename(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
    ) -> FuseResult<()> {
        self.rename_entry(parent, name, new_parent, new_name)
    }

    async fn rename2(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
        flags: u32,
    ) -> FuseResult<()> {
        if flags == 0 {
            return self.rename_entry(parent, name, new_parent, new_name);
        }
        if flags != RENAME_EXCHANGE {
            return Err(libc::EINVAL.into());
        }
        let a = self.child_of(parent, name)?;
        let b = self.child_of(new_parent, new_name)?;
        self.fs.exchange(&a, &b, u64::from(flags))?;
        self.inodes.exchange(&a, &b);
        Ok(())
    }

    async fn link(
        &self,
        _req: Request,
        ino: u64,
        new_parent: u64,
        new_name: &OsStr,
    ) -> FuseResult<ReplyEntry> {
        let from = self.path_of(ino)?;
        let to = self.child_of(new_parent, new_name)?;
        self.fs.link(&from, &to)?;
        // both names share the inode the kernel already knows
        let st = self.fs.getattr(&to)?;
        if !self.inodes.link(ino, &to) {
            return Err(libc::ENOENT.into());
        }
        Ok(ReplyEntry {
            ttl: self.entry_ttl,
            attr: stat_to_attr(&st, ino),
            generation: 0,
        })
    }

    async fn open(&self, _req: Request, ino: u64, flags: u32) -> FuseResult<ReplyOpen> {
        let path = self.path_of(ino)?;
        let fh = self.fs.open(&path, flags as i32)?;
        Ok(ReplyOpen { fh, flags: 0 })
    }

    async fn create(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        flags: u32,
    ) -> FuseResult<ReplyCreated> {
        self.create_entry(parent, name, mode, flags)
    }

    async fn read(
        &self,
        _req: Request,
        ino: u64,
        fh: u64,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        let path = self.traced_path(ino);
        let mut buf = vec![0u8; size as usize];
        let n = self.fs.read(&path, &mut buf, offset, fh)?;
        buf.truncate(n);
        Ok(ReplyData {
            data: Bytes::from(buf),
        })
    }

    async fn write(
        &self,
        _req: Request,
        ino: u64,
        fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> FuseResult<ReplyWrite> {
        let path = self.traced_path(ino);
        let written = self.fs.write(&path, data, offset, fh)?;
        Ok(ReplyWrite {
            written: written as u32,
        })
    }

    async fn statfs(&self, _req: Request, ino: u64) -> FuseResult<ReplyStatFs> {
        let path = self.path_of(ino)?;
        let st = self.fs.statfs(&path)?;
        Ok(ReplyStatFs {
            blocks: st.f_blocks as u64,
            bfree: st.f_bfree as u64,
            bavail: st.f_bavail as u64,
            files: st.f_files as u64,
            ffree: st.f_ffree as u64,
            bsize: st.f_bsize as u32,
            namelen: st.f_namemax as u32,
            frsize: st.f_frsize as u32,
        })
    }

    async fn release(
        &self,
        _req: Request,
        ino: u64,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        Ok(self.fs.release(&self.traced_path(ino), fh)?)
    }

    async fn flush(&self, _req: Request, ino: u64, fh: u64, _lock_owner: u64) -> FuseResult<()> {
        Ok(self.fs.flush(&self.traced_path(ino), fh)?)
    }

    async fn fsync(&self, _req: Request, ino: u64, fh: u64, datasync: bool) -> FuseResult<()> {
        Ok(self.fs.fsync(&self.traced_path(ino), datasync, fh)?)
    }

    async fn setxattr(
        &self,
        _req: Request,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: u32,
        position: u32,
    ) -> FuseResult<()> {
        let path = self.path_of(ino)?;
        Ok(self
            .fs
            .setxattr(&path, name, value, flags as i32, position)?)
    }

    async fn getxattr(
        &self,
        _req: Request,
        ino: u64,
        name: &OsStr,
        size: u32,
    ) -> FuseResult<ReplyXAttr> {
        let path = self.path_of(ino)?;
        let data = self.fs.getxattr(&path, name, size as usize)?;
        Ok(xattr_reply(data))
    }

    async fn listxattr(&self, _req: Request, ino: u64, size: u32) -> FuseResult<ReplyXAttr> {
        let path = self.path_of(ino)?;
        let data = self.fs.listxattr(&path, size as usize)?;
        Ok(xattr_reply(data))
    }

    async fn removexattr(&self, _req: Request, ino: u64, name: &OsStr) -> FuseResult<()> {
        let path = self.path_of(ino)?;
        Ok(self.fs.removexattr(&path, name)?)
    }

    async fn access(&self, _req: Request, ino: u64, mask: u32) -> FuseResult<()> {
        let path = self.path_of(ino)?;
        Ok(self.fs.access(&path, mask as i32)?)
    }

    async fn getlk(
        &self,
        _req: Request,
        ino: u64,
        fh: u64,
        _lock_owner: u64,
        start: u64,
        end: u64,
        r#type: u32,
        _pid: u32,
    ) -> FuseResult<ReplyLock> {
        self.posix_lock(ino, fh, libc::F_GETLK, start, end, r#type)
    }

    async fn setlk(
        &self,
        _req: Request,
        ino: u64,
        fh: u64,
        _lock_owner: u64,
        start: u64,
        end: u64,
        r#type: u32,
        _pid: u32,
        block: bool,
    ) -> FuseResult<()> {
        let cmd = if block { libc::F_SETLKW } else { libc::F_SETLK };
        self.posix_lock(ino, fh, cmd, start, end, r#type).map(drop)
    }

    async fn fallocate(
        &self,
        _req: Request,
        ino: u64,
        fh: u64,
        offset: u64,
        length: u64,
        mode: u32,
    ) -> FuseResult<()> {
        let path = self.traced_path(ino);
        Ok(self.fs.fallocate(&path, mode as i32, offset, length, fh)?)
    }

    async fn opendir(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        let path = self.path_of(ino)?;
        let fh = self.fs.opendir(&path)?;
        Ok(ReplyOpen { fh, flags: 0 })
    }

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<Self::DirEntryStream<'a>>> {
        let entries = self.dir_entries(ino, fh, offset)?;
        let boxed: Self::DirEntryStream<'a> = Box::pin(stream::iter(entries.into_iter().map(Ok)));
        Ok(ReplyDirectory { entries: boxed })
    }

    async fn readdirplus<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
        let entries = self.dir_entries_plus(ino, fh, offset as i64)?;
        let boxed: Self::DirEntryPlusStream<'a> = Box::pin(stream::iter(entries));
        Ok(ReplyDirectoryPlus { entries: boxed })
    }

    async fn releasedir(&self, _req: Request, ino: u64, fh: u64, _flags: u32) -> FuseResult<()> {
        Ok(self.fs.releasedir(&self.traced_path(ino), fh)?)
    }

    async fn fsyncdir(&self, _req: Request, ino: u64, fh: u64, datasync: bool) -> FuseResult<()> {
        Ok(self.fs.fsyncdir(&self.traced_path(ino), datasync, fh)?)
    }

    async fn interrupt(&self, _req: Request, _unique: u64) -> FuseResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passthrough::{Config, SetAttrMask};

    fn bridge(root: &Path, batch: usize) -> FuseBridge {
        FuseBridge::new(Passthrough::new(Config {
            root_dir: root.to_path_buf(),
            readdir_batch: batch,
            ..Default::default()
        }))
    }

    #[test]
    fn attr_uses_table_inode() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f"), b"abc").unwrap();
        let fs = bridge(tmp.path(), 8);
        let st = fs.fs.getattr(Path::new("/f")).unwrap();

        let attr = stat_to_attr(&st, 42);
        assert_eq!(attr.ino, 42);
        assert_eq!(attr.size, 3);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(u32::from(attr.perm), st.st_mode as u32 & 0o7777);
        assert_eq!(attr.blksize, 0);
    }

    #[test]
    fn mode_bits_map_to_kinds() {
        assert_eq!(kind_from_mode(libc::S_IFDIR as u32 | 0o755), FileType::Directory);
        assert_eq!(kind_from_mode(libc::S_IFLNK as u32), FileType::Symlink);
        assert_eq!(kind_from_mode(libc::S_IFIFO as u32), FileType::NamedPipe);
        // unknown directory entry types
        assert_eq!(kind_from_mode(0), FileType::RegularFile);
    }

    #[test]
    fn readdir_honours_batch_and_resumes() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(tmp.path().join(format!("f{i}")), b"").unwrap();
        }
        let fs = bridge(tmp.path(), 2);
        let fh = fs.fs.opendir(Path::new("/")).unwrap();

        let mut names = Vec::new();
        let mut offset = 0;
        loop {
            let batch = fs.dir_entries(ROOT_INODE, fh, offset).unwrap();
            assert!(batch.len() <= 2);
            let Some(last) = batch.last() else {
                break;
            };
            offset = last.offset;
            names.extend(batch.into_iter().map(|e| e.name));
        }
        fs.fs.releasedir(Path::new("/"), fh).unwrap();

        let mut visible: Vec<_> = names.into_iter().filter(|n| n != "." && n != "..").collect();
        visible.sort();
        assert_eq!(visible, ["f0", "f1", "f2", "f3", "f4"]);
    }

    #[test]
    fn readdirplus_registers_children() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub").join("x"), b"xyz").unwrap();
        let fs = bridge(tmp.path(), 16);
        let sub = fs.entry_for(Path::new("/sub")).unwrap().attr.ino;
        let fh = fs.fs.opendir(Path::new("/sub")).unwrap();

        let entries = fs.dir_entries_plus(sub, fh, 0).unwrap();
        fs.fs.releasedir(Path::new("/sub"), fh).unwrap();

        let entries: Vec<_> = entries.into_iter().map(Result::unwrap).collect();
        let dot = entries.iter().find(|e| e.name == ".").unwrap();
        assert_eq!(dot.inode, sub);
        let dotdot = entries.iter().find(|e| e.name == "..").unwrap();
        assert_eq!(dotdot.inode, ROOT_INODE);
        let x = entries.iter().find(|e| e.name == "x").unwrap();
        assert_eq!(x.attr.ino, x.inode);
        assert_eq!(x.attr.size, 3);
        assert_eq!(fs.inodes.path(x.inode), Some(PathBuf::from("/sub/x")));
    }

    #[test]
    fn namespace_requests_keep_table_in_sync() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = bridge(tmp.path(), 16);

        fs.fs.mkdir(Path::new("/d"), 0o755).unwrap();
        let dir = fs.entry_for(Path::new("/d")).unwrap();
        assert_eq!(dir.attr.kind, FileType::Directory);

        let created = fs
            .create_entry(dir.attr.ino, OsStr::new("f"), 0o644, libc::O_RDWR as u32)
            .unwrap();
        assert_eq!(fs.fs.write(Path::new("/d/f"), b"data", 0, created.fh).unwrap(), 4);
        fs.fs.release(Path::new("/d/f"), created.fh).unwrap();

        fs.rename_entry(ROOT_INODE, OsStr::new("d"), ROOT_INODE, OsStr::new("e"))
            .unwrap();
        // the file's inode followed its parent
        assert_eq!(fs.inodes.path(created.attr.ino), Some(PathBuf::from("/e/f")));
        let st = fs.stat(&fs.path_of(created.attr.ino).unwrap(), None).unwrap();
        assert_eq!(st.st_size, 4);

        match fs.entry_for(Path::new("/d")) {
            Ok(_) => panic!("old name still resolves"),
            Err(e) => {
                let e: std::io::Error = e.into();
                assert_eq!(e.raw_os_error(), Some(libc::ENOENT));
            }
        }
    }

    #[test]
    fn setattr_maps_selected_fields() {
        let set_attr = SetAttr {
            mode: Some((libc::S_IFREG | 0o4644) as _),
            size: Some(3),
            mtime: Some(Timestamp::new(9, 5)),
            ctime: Some(Timestamp::new(7, 0)),
            ..Default::default()
        };
        let req = setattr_request(&set_attr);
        assert_eq!(
            req.valid,
            SetAttrMask::MODE | SetAttrMask::SIZE | SetAttrMask::MTIME
        );
        assert_eq!(req.mode, 0o4644);
        assert_eq!(req.mtime, Timespec::new(9, 5));
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn setattr_maps_extended_fields() {
        let set_attr = SetAttr {
            crtime: Some(Timestamp::new(1, 0)),
            chgtime: Some(Timestamp::new(2, 0)),
            bkuptime: Some(Timestamp::new(3, 0)),
            flags: Some(0x8),
            ..Default::default()
        };
        let req = setattr_request(&set_attr);
        assert_eq!(
            req.valid,
            SetAttrMask::CRTIME | SetAttrMask::CHGTIME | SetAttrMask::BKUPTIME | SetAttrMask::FLAGS
        );
        assert_eq!(req.crtime, Timespec::new(1, 0));
        assert_eq!(req.bkuptime, Timespec::new(3, 0));
        assert_eq!(req.flags, 0x8);
    }

    #[test]
    fn lock_ranges_convert_both_ways() {
        let whole = flock_from_range(0, u64::MAX, libc::F_WRLCK as u32).unwrap();
        assert_eq!((whole.l_start, whole.l_len), (0, 0));
        assert_eq!(lock_reply(&whole).end, i64::MAX as u64);

        let part = flock_from_range(10, 19, libc::F_RDLCK as u32).unwrap();
        assert_eq!((part.l_start, part.l_len), (10, 10));
        let reply = lock_reply(&part);
        assert_eq!((reply.start, reply.end), (10, 19));
        assert_eq!(reply.r#type, libc::F_RDLCK as u32);

        assert!(flock_from_range(20, 10, libc::F_RDLCK as u32).is_err());
    }

    #[tokio::test]
    async fn record_locks_reach_the_host() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f"), b"0123456789").unwrap();
        let fs = bridge(tmp.path(), 16);
        let ino = fs
            .lookup(Request::default(), ROOT_INODE, OsStr::new("f"))
            .await
            .unwrap()
            .attr
            .ino;
        let fh = fs
            .open(Request::default(), ino, libc::O_RDWR as u32)
            .await
            .unwrap()
            .fh;

        fs.setlk(Request::default(), ino, fh, 1, 0, 4, libc::F_WRLCK as u32, 0, false)
            .await
            .unwrap();
        // the shim owns the lock, so testing it from the same process finds
        // nothing in the way
        let holder = fs
            .getlk(Request::default(), ino, fh, 1, 0, u64::MAX, libc::F_WRLCK as u32, 0)
            .await
            .unwrap();
        assert_eq!(holder.r#type, libc::F_UNLCK as u32);
        fs.setlk(Request::default(), ino, fh, 1, 0, 4, libc::F_UNLCK as u32, 0, false)
            .await
            .unwrap();

        // a bad handle is refused by the host call, not swallowed
        assert!(
            fs.setlk(Request::default(), ino, 999, 1, 0, 4, libc::F_WRLCK as u32, 0, false)
                .await
                .is_err()
        );
        fs.release(Request::default(), ino, fh, 0, 0, false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn init_offers_what_the_session_enables() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = bridge(tmp.path(), 16);
        fs.init(Request::default()).await.unwrap();

        let caps = fs.passthrough().capabilities();
        assert_eq!(caps, Capabilities::wanted().negotiate(session_capabilities()));
        assert!(caps.contains(Capabilities::POSIX_LOCKS));
        assert!(!caps.contains(Capabilities::FLOCK_LOCKS));
    }

    #[test]
    fn readdir_reports_known_children_by_table_inode() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("x"), b"").unwrap();
        std::fs::write(tmp.path().join("y"), b"").unwrap();
        let fs = bridge(tmp.path(), 16);
        let x = fs.entry_for(Path::new("/x")).unwrap().attr.ino;

        let fh = fs.fs.opendir(Path::new("/")).unwrap();
        let entries = fs.dir_entries(ROOT_INODE, fh, 0).unwrap();
        fs.fs.releasedir(Path::new("/"), fh).unwrap();

        let inode_of = |name: &str| entries.iter().find(|e| e.name == name).unwrap().inode;
        assert_eq!(inode_of("x"), x);
        assert_eq!(inode_of("."), ROOT_INODE);
        assert_ne!(inode_of("y"), 0);
    }

    #[tokio::test]
    async fn hard_link_keeps_one_inode() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f"), b"abc").unwrap();
        let fs = bridge(tmp.path(), 16);
        let ino = fs
            .lookup(Request::default(), ROOT_INODE, OsStr::new("f"))
            .await
            .unwrap()
            .attr
            .ino;

        let linked = fs
            .link(Request::default(), ino, ROOT_INODE, OsStr::new("g"))
            .await
            .unwrap();
        assert_eq!(linked.attr.ino, ino);
        assert_eq!(linked.attr.nlink, 2);

        let again = fs
            .lookup(Request::default(), ROOT_INODE, OsStr::new("g"))
            .await
            .unwrap();
        assert_eq!(again.attr.ino, ino);

        fs.unlink(Request::default(), ROOT_INODE, OsStr::new("f"))
            .await
            .unwrap();
        let attr = fs
            .getattr(Request::default(), ino, None, 0)
            .await
            .unwrap()
            .attr;
        assert_eq!(attr.size, 3);
        assert_eq!(attr.nlink, 1);
    }
}
