//! Per-open state stored behind the framework's 64-bit handle slot.

use std::collections::BTreeMap;
use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use super::dir_cursor::DirCursor;
use super::errno::{Errno, Result};

/// What an open handle refers to.
pub enum Handle {
    File(File),
    Dir(Mutex<DirCursor>),
}

impl Handle {
    pub fn as_file(&self) -> Result<&File> {
        match self {
            Handle::File(f) => Ok(f),
            Handle::Dir(_) => Err(Errno::bad_handle()),
        }
    }

    pub fn lock_dir(&self) -> Result<MutexGuard<'_, DirCursor>> {
        match self {
            Handle::Dir(cursor) => Ok(cursor.lock().unwrap_or_else(PoisonError::into_inner)),
            Handle::File(_) => Err(Errno::bad_handle()),
        }
    }

    pub fn as_raw_fd(&self) -> RawFd {
        match self {
            Handle::File(f) => f.as_raw_fd(),
            Handle::Dir(cursor) => cursor
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .stream()
                .as_raw_fd(),
        }
    }

    /// Explicitly close the underlying resource, logging close failures.
    fn release(self) {
        match self {
            Handle::File(f) => drop(f),
            Handle::Dir(cursor) => cursor
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner)
                .release(),
        }
    }
}

/// Map from handle slot values to open state.
pub struct HandleTable {
    next: AtomicU64,
    map: RwLock<BTreeMap<u64, Arc<Handle>>>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        HandleTable {
            // zero stays unused so a missing handle is never mistaken for one
            next: AtomicU64::new(1),
            map: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, handle: Handle) -> u64 {
        let fh = self.next.fetch_add(1, Ordering::Relaxed);
        self.map
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fh, Arc::new(handle));
        fh
    }

    pub fn get(&self, fh: u64) -> Result<Arc<Handle>> {
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&fh)
            .cloned()
            .ok_or_else(Errno::bad_handle)
    }

    /// Drop the slot and release the resource once no request still uses it.
    pub fn remove(&self, fh: u64) -> Result<()> {
        let handle = self
            .map
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&fh)
            .ok_or_else(Errno::bad_handle)?;
        match Arc::try_unwrap(handle) {
            Ok(handle) => handle.release(),
            // an in-flight request holds a clone; Drop closes it afterwards
            Err(_) => debug!("handle {fh} still in use at release"),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.map.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    #[test]
    fn slots_are_distinct_and_removable() {
        let tmp = tempfile::tempdir().unwrap();
        let table = HandleTable::new();
        let f = File::create(tmp.path().join("f")).unwrap();
        let dir = CString::new(tmp.path().as_os_str().as_bytes()).unwrap();

        let file_fh = table.insert(Handle::File(f));
        let dir_fh = table.insert(Handle::Dir(Mutex::new(DirCursor::open(&dir).unwrap())));
        assert_ne!(file_fh, dir_fh);
        assert_ne!(file_fh, 0);
        assert_eq!(table.len(), 2);

        assert!(table.get(file_fh).unwrap().as_file().is_ok());
        assert_eq!(
            table.get(file_fh).unwrap().lock_dir().err(),
            Some(Errno::bad_handle())
        );
        assert!(table.get(dir_fh).unwrap().lock_dir().is_ok());

        table.remove(dir_fh).unwrap();
        table.remove(file_fh).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.get(file_fh).err(), Some(Errno::bad_handle()));
        assert_eq!(table.remove(file_fh), Err(Errno::bad_handle()));
    }
}
