//! Inode numbers handed to the kernel, mapped to paths under the mount root.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

pub const ROOT_INODE: u64 = 1;

struct Node {
    path: PathBuf,
    lookups: u64,
}

struct Inner {
    next: u64,
    by_ino: HashMap<u64, Node>,
    by_path: HashMap<PathBuf, u64>,
}

impl Inner {
    fn take_subtree(&mut self, root: &Path) -> Vec<(PathBuf, u64)> {
        let paths: Vec<PathBuf> = self
            .by_path
            .keys()
            .filter(|p| p.starts_with(root))
            .cloned()
            .collect();
        paths
            .into_iter()
            .filter_map(|p| self.by_path.remove(&p).map(|ino| (p, ino)))
            .collect()
    }

    fn reinsert(&mut self, entries: Vec<(PathBuf, u64)>, from: &Path, to: &Path) {
        for (old, ino) in entries {
            let Ok(rest) = old.strip_prefix(from) else {
                continue;
            };
            let new = if rest.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(rest)
            };
            if let Some(node) = self.by_ino.get_mut(&ino) {
                node.path = new.clone();
            }
            self.by_path.insert(new, ino);
        }
    }
}

/// Path bookkeeping for the inode-addressed protocol.
pub struct InodeTable {
    inner: Mutex<Inner>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let root = PathBuf::from("/");
        let mut by_ino = HashMap::new();
        by_ino.insert(
            ROOT_INODE,
            Node {
                path: root.clone(),
                lookups: 1,
            },
        );
        let mut by_path = HashMap::new();
        by_path.insert(root, ROOT_INODE);
        InodeTable {
            inner: Mutex::new(Inner {
                next: ROOT_INODE + 1,
                by_ino,
                by_path,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self, ino: u64) -> Option<PathBuf> {
        self.lock().by_ino.get(&ino).map(|n| n.path.clone())
    }

    /// Path of `name` inside the directory `parent`.
    pub fn child_path(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        self.path(parent).map(|p| p.join(name))
    }

    /// Inode for `path`, allocating one if needed, and count one lookup.
    pub fn lookup(&self, path: &Path) -> u64 {
        let mut inner = self.lock();
        if let Some(&ino) = inner.by_path.get(path) {
            if let Some(node) = inner.by_ino.get_mut(&ino) {
                node.lookups += 1;
            }
            return ino;
        }
        let ino = inner.next;
        inner.next += 1;
        inner.by_ino.insert(
            ino,
            Node {
                path: path.to_path_buf(),
                lookups: 1,
            },
        );
        inner.by_path.insert(path.to_path_buf(), ino);
        ino
    }

    /// Inode for `path` without counting a lookup.
    pub fn peek(&self, path: &Path) -> Option<u64> {
        self.lock().by_path.get(path).copied()
    }

    /// Drop `nlookup` references; the inode disappears at zero.
    pub fn forget(&self, ino: u64, nlookup: u64) {
        if ino == ROOT_INODE {
            return;
        }
        let mut inner = self.lock();
        let Some(node) = inner.by_ino.get_mut(&ino) else {
            return;
        };
        node.lookups = node.lookups.saturating_sub(nlookup);
        if node.lookups == 0 {
            inner.by_ino.remove(&ino);
            inner.by_path.retain(|_, i| *i != ino);
        }
    }

    /// Register `path` as another name of `ino` and count one lookup.
    pub fn link(&self, ino: u64, path: &Path) -> bool {
        let mut inner = self.lock();
        let Some(node) = inner.by_ino.get_mut(&ino) else {
            return false;
        };
        node.lookups += 1;
        inner.by_path.insert(path.to_path_buf(), ino);
        true
    }

    /// The path is gone; the inode lives on until forgotten, reachable
    /// through any other name it still has.
    pub fn unlink(&self, path: &Path) {
        let mut inner = self.lock();
        let Some(ino) = inner.by_path.remove(path) else {
            return;
        };
        let alias = inner
            .by_path
            .iter()
            .find(|(_, i)| **i == ino)
            .map(|(p, _)| p.clone());
        if let (Some(alias), Some(node)) = (alias, inner.by_ino.get_mut(&ino)) {
            if node.path == path {
                node.path = alias;
            }
        }
    }

    /// Move `from` and everything below it to `to`.
    pub fn rename(&self, from: &Path, to: &Path) {
        let mut inner = self.lock();
        inner.by_path.remove(to);
        let moved = inner.take_subtree(from);
        inner.reinsert(moved, from, to);
    }

    /// Swap the subtrees at `a` and `b`.
    pub fn exchange(&self, a: &Path, b: &Path) {
        let mut inner = self.lock();
        let under_a = inner.take_subtree(a);
        let under_b = inner.take_subtree(b);
        inner.reinsert(under_a, a, b);
        inner.reinsert(under_b, b, a);
    }

    pub fn len(&self) -> usize {
        self.lock().by_ino.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
