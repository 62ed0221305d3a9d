use std::{fmt, fs, io, path::Path};

use crate::{info, DEBUG_NAME};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMechanism {
    Symlink,
    HardLink,
    Copy,
}

impl fmt::Display for LinkMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Symlink => "symbolic link",
            Self::HardLink => "hard link",
            Self::Copy => "copy",
        })
    }
}

/// One way of making `secondary` resolve to the bytes of `primary`.
pub type LinkFn = fn(&Path, &Path) -> io::Result<()>;
pub type LinkAttempt = (LinkMechanism, LinkFn);

/// Cheapest mechanism first.
pub const LINK_ATTEMPTS: [LinkAttempt; 3] = [
    (LinkMechanism::Symlink, symlink_file),
    (LinkMechanism::HardLink, hard_link),
    (LinkMechanism::Copy, copy_file),
];

/// Points `secondary` at the bytes of `primary` using the first attempt that works.
///
/// Failures are logged and the next attempt is tried; only the failure of the
/// last attempt is returned.
pub fn ensure_secondary_reference(
    primary: &Path,
    secondary: &Path,
    attempts: &[LinkAttempt],
) -> io::Result<LinkMechanism> {
    fs::metadata(primary)?;

    let mut last_err = io::Error::new(io::ErrorKind::InvalidInput, "no link mechanism configured");
    for (mechanism, link) in attempts {
        remove_if_present(secondary)?;
        match link(primary, secondary) {
            Ok(()) => return Ok(*mechanism),
            Err(e) => {
                info!("[{}][LINK] {} unavailable: {}", DEBUG_NAME, mechanism, e);
                last_err = e;
            }
        }
    }

    remove_if_present(secondary)?;
    Err(last_err)
}

fn hard_link(primary: &Path, secondary: &Path) -> io::Result<()> {
    fs::hard_link(primary, secondary)
}

fn copy_file(primary: &Path, secondary: &Path) -> io::Result<()> {
    fs::copy(primary, secondary).map(|_| ())
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

// Link targets are stored relative so the slot folder can be moved as a whole.
#[cfg(windows)]
fn symlink_file(primary: &Path, secondary: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(link_target(primary, secondary), secondary)
}

#[cfg(unix)]
fn symlink_file(primary: &Path, secondary: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link_target(primary, secondary), secondary)
}

#[cfg(not(any(windows, unix)))]
fn symlink_file(_primary: &Path, _secondary: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symbolic links unsupported"))
}

#[cfg(any(windows, unix))]
fn link_target<'a>(primary: &'a Path, secondary: &Path) -> &'a Path {
    match (primary.parent(), secondary.parent(), primary.file_name()) {
        (Some(a), Some(b), Some(name)) if a == b => Path::new(name),
        _ => primary,
    }
}
