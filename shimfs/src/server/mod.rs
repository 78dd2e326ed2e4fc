use std::ffi::{OsStr, OsString};
use std::io;

use nix::sys::stat::{Mode, umask};
use rfuse3::raw::{Filesystem, MountHandle};
use rfuse3::{MountOptions, raw::Session};

pub mod bridge;
pub mod inode_table;

pub use bridge::FuseBridge;
pub use inode_table::{InodeTable, ROOT_INODE};

/// Clear the process umask so modes arriving in requests reach the host
/// unmasked; the kernel has already applied the caller's umask. Returns the
/// previous mask.
pub fn clear_umask() -> Mode {
    umask(Mode::empty())
}

/// Mount `fs` at `mountpoint`, through fusermount3 unless `privileged`.
pub async fn mount_filesystem<F: Filesystem + std::marker::Sync + Send + 'static>(
    fs: F,
    mountpoint: &OsStr,
    privileged: bool,
) -> io::Result<MountHandle> {
    let mount_path: OsString = OsString::from(mountpoint);

    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };

    let mut mount_options = MountOptions::default();
    mount_options
        .fs_name("shimfs")
        .force_readdir_plus(true)
        .uid(uid)
        .gid(gid);

    let session = Session::<F>::new(mount_options);
    if privileged {
        session.mount(fs, mount_path).await
    } else {
        session.mount_with_unprivileged(fs, mount_path).await
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::passthrough::{Config, Passthrough};
    use crate::unwrap_or_skip_eperm;
    use std::time::Duration;

    #[tokio::test]
    async fn mount_and_list() {
        if std::env::var("SHIMFS_FUSE_TEST").ok().as_deref() != Some("1") {
            eprintln!("skip fuse mount test: set SHIMFS_FUSE_TEST=1 to enable");
            return;
        }

        let backing = tempfile::tempdir().unwrap();
        std::fs::write(backing.path().join("hello.txt"), b"hello").unwrap();
        let mnt = tempfile::tempdir().unwrap();

        let fs = FuseBridge::new(Passthrough::new(Config {
            root_dir: backing.path().to_path_buf(),
            ..Default::default()
        }));
        let handle = unwrap_or_skip_eperm!(
            mount_filesystem(fs, mnt.path().as_os_str(), false).await,
            "mount session"
        );
        tokio::time::sleep(Duration::from_millis(500)).await;

        let names: Vec<_> = std::fs::read_dir(mnt.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name())
            .collect();
        assert!(names.iter().any(|n| n == "hello.txt"));
        assert_eq!(std::fs::read(mnt.path().join("hello.txt")).unwrap(), b"hello");

        std::fs::write(mnt.path().join("new.txt"), b"abc").unwrap();
        assert_eq!(std::fs::read(backing.path().join("new.txt")).unwrap(), b"abc");

        if let Err(e) = handle.unmount().await {
            eprintln!("unmount error: {e}");
        }
    }
}
