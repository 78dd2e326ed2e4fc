//! Offset-addressed enumeration over a sequential directory stream.
//!
//! The fuse framework asks for directory entries starting at an arbitrary
//! offset that it got back from an earlier reply, and it may stop accepting
//! entries at any point because its reply buffer is full. The host only gives
//! us a forward-only stream with opaque `telldir`/`seekdir` tokens. The
//! [`DirCursor`] keeps those two views consistent: the entry that did not fit
//! stays pending, and the cursor offset always equals the stream position of
//! the last accepted entry.

use std::ffi::{CStr, OsStr, OsString};
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::ptr::NonNull;

use super::errno::{Errno, Result, cvt};

/// A forward-only directory stream with opaque position tokens.
pub trait DirectoryStream {
    /// Fetch the next entry; `Ok(None)` at the end of the directory.
    fn next_entry(&mut self) -> Result<Option<RawDirEntry>>;
    /// Position token of the entry that the next fetch would return.
    fn tell(&self) -> i64;
    /// Reposition to a token previously returned by [`tell`](Self::tell).
    fn seek(&mut self, offset: i64);
}

/// An entry copied out of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDirEntry {
    pub name: OsString,
    pub ino: u64,
    pub d_type: u8,
}

/// Minimal attributes synthesized for each emitted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryAttr {
    pub ino: u64,
    /// File-type bits only (`S_IFMT` part of a mode), zero when unknown.
    pub mode: u32,
}

impl From<&RawDirEntry> for EntryAttr {
    fn from(entry: &RawDirEntry) -> Self {
        // DT_* values are the S_IF* type bits shifted down by 12.
        EntryAttr {
            ino: entry.ino,
            mode: u32::from(entry.d_type) << 12,
        }
    }
}

/// Host directory stream opened with `opendir(3)`.
pub struct HostDir {
    dir: NonNull<libc::DIR>,
}

// The stream is owned by exactly one cursor and only touched under its lock.
unsafe impl Send for HostDir {}

impl HostDir {
    pub fn open(path: &CStr) -> Result<Self> {
        let dir = unsafe { libc::opendir(path.as_ptr()) };
        NonNull::new(dir)
            .map(|dir| HostDir { dir })
            .ok_or_else(Errno::last)
    }

    pub fn as_raw_fd(&self) -> RawFd {
        unsafe { libc::dirfd(self.dir.as_ptr()) }
    }

    /// Close the stream, reporting the native close outcome.
    pub fn close(self) -> Result<()> {
        let dir = self.dir;
        std::mem::forget(self);
        cvt(unsafe { libc::closedir(dir.as_ptr()) }).map(drop)
    }
}

impl DirectoryStream for HostDir {
    fn next_entry(&mut self) -> Result<Option<RawDirEntry>> {
        // readdir reports both end-of-stream and failure with NULL.
        nix::errno::Errno::clear();
        let dent = unsafe { libc::readdir(self.dir.as_ptr()) };
        if dent.is_null() {
            return match nix::errno::Errno::last_raw() {
                0 => Ok(None),
                code => Err(Errno::from_raw(code)),
            };
        }

        let entry = unsafe {
            let dent = &*dent;
            RawDirEntry {
                name: OsStr::from_bytes(CStr::from_ptr(dent.d_name.as_ptr()).to_bytes())
                    .to_os_string(),
                ino: dent.d_ino as u64,
                d_type: dent.d_type,
            }
        };
        Ok(Some(entry))
    }

    fn tell(&self) -> i64 {
        unsafe { libc::telldir(self.dir.as_ptr()) as i64 }
    }

    fn seek(&mut self, offset: i64) {
        unsafe { libc::seekdir(self.dir.as_ptr(), offset as libc::c_long) }
    }
}

impl Drop for HostDir {
    fn drop(&mut self) {
        unsafe { libc::closedir(self.dir.as_ptr()) };
    }
}

/// One open directory enumeration session.
pub struct DirCursor<S = HostDir> {
    stream: S,
    pending: Option<RawDirEntry>,
    offset: i64,
}

impl DirCursor<HostDir> {
    pub fn open(path: &CStr) -> Result<Self> {
        Ok(DirCursor::new(HostDir::open(path)?))
    }

    /// Close the underlying stream; close failures are only logged.
    pub fn release(self) {
        if let Err(e) = self.stream.close() {
            warn!("closedir failed: {e}");
        }
    }
}

impl<S: DirectoryStream> DirCursor<S> {
    pub fn new(stream: S) -> Self {
        DirCursor {
            stream,
            pending: None,
            offset: 0,
        }
    }

    /// Offset of the last entry the caller accepted.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// Emit entries starting at `offset` until the stream ends or `emit`
    /// returns `false`.
    ///
    /// `emit` receives the entry name, its minimal attributes and the offset
    /// to pass back in order to resume after this entry. An entry refused by
    /// `emit` is kept and offered again by the next call that resumes from
    /// the same offset.
    pub fn read<F>(&mut self, offset: i64, mut emit: F) -> Result<()>
    where
        F: FnMut(&OsStr, &EntryAttr, i64) -> bool,
    {
        if offset != self.offset {
            self.stream.seek(offset);
            self.pending = None;
            self.offset = offset;
        }

        loop {
            let entry = match self.pending.take() {
                Some(entry) => entry,
                None => match self.stream.next_entry()? {
                    Some(entry) => entry,
                    None => break,
                },
            };

            let attr = EntryAttr::from(&entry);
            let next_offset = self.stream.tell();

            if !emit(&entry.name, &attr, next_offset) {
                trace!("dir cursor full at {:?}", entry.name);
                self.pending = Some(entry);
                break;
            }

            self.offset = next_offset;
        }

        Ok(())
    }
}
