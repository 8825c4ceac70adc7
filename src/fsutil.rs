//! Filesystem helpers for writing into the target root.

use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use rustix::fs::{self as rfs, CWD, Mode, OFlags};
use rustix::io::Errno;

use crate::error::RsimgstrapError;

/// Mode for directories created inside the target: `rwxr-xr-x`.
pub const DIRECTORY_MODE: Mode = Mode::RWXU
    .union(Mode::RGRP)
    .union(Mode::XGRP)
    .union(Mode::ROTH)
    .union(Mode::XOTH);

/// Mode for files copied into the target: `rw-r--r--`.
const FILE_MODE: Mode = Mode::RUSR.union(Mode::WUSR).union(Mode::RGRP).union(Mode::ROTH);

const REPLACE_SUFFIX: &str = ".rsimgstrap-new";

/// Maps an absolute in-target path (e.g. `/etc/portage`) below `root`.
pub fn path_in_root(root: &Utf8Path, absolute: &str) -> Utf8PathBuf {
    root.join(absolute.trim_start_matches('/'))
}

fn mkdir_once(path: &Utf8Path) -> Result<(), Errno> {
    match rfs::mkdir(path.as_std_path(), DIRECTORY_MODE) {
        Ok(()) => Ok(()),
        // Already exists counts as success.
        Err(e) if e == Errno::EXIST => Ok(()),
        Err(e) => Err(e),
    }
}

/// Creates `path` and any missing parents with [`DIRECTORY_MODE`].
///
/// Succeeds silently when the directory already exists. Any other OS-level
/// failure (permission denied, a parent that is a regular file, ...) is
/// returned as `RsimgstrapError::Io`.
pub fn ensure_directory(path: &Utf8Path) -> Result<(), RsimgstrapError> {
    let to_io = |e: Errno| {
        RsimgstrapError::io(format!("failed to create directory {}", path), e.into())
    };

    match mkdir_once(path) {
        Ok(()) => Ok(()),
        Err(e) if e == Errno::NOENT => {
            let parent = match path.parent() {
                Some(parent) if !parent.as_str().is_empty() && parent != path => parent,
                _ => return Err(to_io(e)),
            };
            ensure_directory(parent)?;
            mkdir_once(path).map_err(to_io)
        }
        Err(e) => Err(to_io(e)),
    }
}

/// Writes `content` to `path`, replacing any previous content.
pub fn write_file(path: &Utf8Path, content: &str) -> Result<(), RsimgstrapError> {
    fs::write(path, content)
        .map_err(|e| RsimgstrapError::io(format!("failed to write {}", path), e))
}

/// Copies `from` to `to`, replacing `to` if it exists.
pub fn copy_file(from: &Utf8Path, to: &Utf8Path) -> Result<(), RsimgstrapError> {
    fs::copy(from, to)
        .map(|_| ())
        .map_err(|e| RsimgstrapError::io(format!("failed to copy {} to {}", from, to), e))
}

/// Refuses a directory that is a symlink or not a directory at all.
pub fn ensure_real_directory(path: &Utf8Path) -> Result<(), RsimgstrapError> {
    rfs::openat(
        CWD,
        path.as_str(),
        OFlags::NOFOLLOW | OFlags::DIRECTORY | OFlags::RDONLY | OFlags::CLOEXEC,
        Mode::empty(),
    )
    .map(drop)
    .map_err(|e| match e {
        Errno::LOOP | Errno::NOTDIR => RsimgstrapError::Isolation(format!(
            "{} is a symlink or not a directory, refusing to write into it",
            path
        )),
        _ => RsimgstrapError::io(format!("failed to open {}", path), e.into()),
    })
}

/// Copies `from` over `to` without following a symlink at `to`.
///
/// The content goes to a sibling file opened with `O_NOFOLLOW | O_EXCL`,
/// which is then renamed over `to`. A symlink at `to` is replaced, never
/// written through.
pub fn replace_file(from: &Utf8Path, to: &Utf8Path) -> Result<(), RsimgstrapError> {
    let content =
        fs::read(from).map_err(|e| RsimgstrapError::io(format!("failed to read {}", from), e))?;
    let staged = Utf8PathBuf::from(format!("{}{}", to, REPLACE_SUFFIX));
    match fs::remove_file(&staged) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(RsimgstrapError::io(format!("failed to remove {}", staged), e)),
    }

    let fd = rfs::openat(
        CWD,
        staged.as_str(),
        OFlags::WRONLY | OFlags::CREATE | OFlags::EXCL | OFlags::NOFOLLOW | OFlags::CLOEXEC,
        FILE_MODE,
    )
    .map_err(|e| RsimgstrapError::io(format!("failed to create {}", staged), e.into()))?;
    fs::File::from(fd)
        .write_all(&content)
        .map_err(|e| RsimgstrapError::io(format!("failed to write {}", staged), e))?;

    fs::rename(&staged, to).map_err(|e| {
        RsimgstrapError::io(format!("failed to move {} to {}", staged, to), e)
    })
}

/// Returns `path` as an absolute UTF-8 path without touching the filesystem.
pub fn absolute(path: &Utf8Path) -> Result<Utf8PathBuf, RsimgstrapError> {
    let abs = std::path::absolute(path)
        .map_err(|e| RsimgstrapError::io(format!("failed to make path absolute: {}", path), e))?;
    Utf8PathBuf::from_path_buf(abs).map_err(|p| {
        RsimgstrapError::Validation(format!("path is not valid UTF-8: {}", p.display()))
    })
}
