//! Symbolic rendering of the flag words that show up in trace records.

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Status flags passed to open and create.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: i32 {
        const CREAT = libc::O_CREAT;
        const EXCL = libc::O_EXCL;
        const NOCTTY = libc::O_NOCTTY;
        const TRUNC = libc::O_TRUNC;
        const APPEND = libc::O_APPEND;
        const NONBLOCK = libc::O_NONBLOCK;
        const SYNC = libc::O_SYNC;
        const DIRECTORY = libc::O_DIRECTORY;
        const NOFOLLOW = libc::O_NOFOLLOW;
        const CLOEXEC = libc::O_CLOEXEC;
    }
}

bitflags! {
    /// Permission mask of an access request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessMode: i32 {
        const READ = libc::R_OK;
        const WRITE = libc::W_OK;
        const EXEC = libc::X_OK;
    }
}

fn write_names<I: Iterator<Item = (&'static str, bool)>>(
    f: &mut fmt::Formatter<'_>,
    names: I,
    empty: &str,
) -> fmt::Result {
    let mut first = true;
    for (name, _) in names.filter(|(_, set)| *set) {
        if !first {
            f.write_str("|")?;
        }
        f.write_str(name)?;
        first = false;
    }
    if first {
        f.write_str(empty)?;
    }
    Ok(())
}

/// `O_RDWR|O_CREAT|O_TRUNC` style rendering of raw open flags.
pub(crate) struct OpenFlagsDisplay(pub i32);

impl fmt::Display for OpenFlagsDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let access = match self.0 & libc::O_ACCMODE {
            libc::O_RDONLY => "O_RDONLY",
            libc::O_WRONLY => "O_WRONLY",
            libc::O_RDWR => "O_RDWR",
            _ => "O_ACCMODE?",
        };
        f.write_str(access)?;
        let status = OpenFlags::from_bits_truncate(self.0);
        for (name, _) in status.iter_names() {
            write!(f, "|O_{name}")?;
        }
        let unknown = self.0 & !(OpenFlags::all().bits() | libc::O_ACCMODE);
        if unknown != 0 {
            write!(f, "|{unknown:#x}")?;
        }
        Ok(())
    }
}

/// `R_OK|W_OK` style rendering of an access mask.
pub(crate) struct AccessModeDisplay(pub i32);

impl fmt::Display for AccessModeDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = AccessMode::from_bits_truncate(self.0);
        write_names(
            f,
            [
                ("R_OK", mode.contains(AccessMode::READ)),
                ("W_OK", mode.contains(AccessMode::WRITE)),
                ("X_OK", mode.contains(AccessMode::EXEC)),
            ]
            .into_iter(),
            "F_OK",
        )
    }
}

/// Name of an fcntl record-lock command.
pub(crate) fn lock_cmd_name(cmd: i32) -> &'static str {
    match cmd {
        libc::F_GETLK => "F_GETLK",
        libc::F_SETLK => "F_SETLK",
        libc::F_SETLKW => "F_SETLKW",
        _ => "F_?",
    }
}

/// `LOCK_EX|LOCK_NB` style rendering of a flock operation.
pub(crate) struct FlockOpDisplay(pub i32);

impl fmt::Display for FlockOpDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_names(
            f,
            [
                ("LOCK_SH", self.0 & libc::LOCK_SH != 0),
                ("LOCK_EX", self.0 & libc::LOCK_EX != 0),
                ("LOCK_UN", self.0 & libc::LOCK_UN != 0),
                ("LOCK_NB", self.0 & libc::LOCK_NB != 0),
            ]
            .into_iter(),
            "0",
        )
    }
}
