use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;

use nix::sys::stat::{Mode, umask};
use rfuse3::raw::{Filesystem, Request};
use shimfs::passthrough::{Config, Passthrough};
use shimfs::server::{FuseBridge, ROOT_INODE, clear_umask};

// Kept alone in this binary: the umask is process-wide.
#[tokio::test]
async fn requested_modes_reach_the_host_unmasked() {
    umask(Mode::from_bits_truncate(0o022));
    assert_eq!(clear_umask().bits() & 0o777, 0o022);

    let backing = tempfile::tempdir().unwrap();
    let fs = FuseBridge::new(Passthrough::new(Config {
        root_dir: backing.path().to_path_buf(),
        ..Default::default()
    }));

    let dir = fs
        .mkdir(Request::default(), ROOT_INODE, OsStr::new("d"), 0o777, 0)
        .await
        .unwrap();
    assert_eq!(dir.attr.perm, 0o777);

    let created = fs
        .create(
            Request::default(),
            ROOT_INODE,
            OsStr::new("f"),
            libc::S_IFREG as u32 | 0o666,
            libc::O_RDWR as u32,
        )
        .await
        .unwrap();
    assert_eq!(created.attr.perm, 0o666);
    fs.release(Request::default(), created.attr.ino, created.fh, 0, 0, false)
        .await
        .unwrap();

    let mode = |name: &str| {
        std::fs::metadata(backing.path().join(name))
            .unwrap()
            .permissions()
            .mode()
            & 0o777
    };
    assert_eq!(mode("d"), 0o777);
    assert_eq!(mode("f"), 0o666);

    // the umask carried by the request still applies
    let masked = fs
        .mkdir(Request::default(), ROOT_INODE, OsStr::new("m"), 0o777, 0o027)
        .await
        .unwrap();
    assert_eq!(masked.attr.perm, 0o750);
}
