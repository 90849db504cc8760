//! File copy/write helpers used when mutating the image root.
//!
//! All helpers overwrite existing destinations and create missing parent
//! directories. Errors are plain `io::Error`s; callers map them onto the
//! error kind that fits their step (`FileCopy`, `ConfigWrite`, ...).

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};

/// Creates the parent directory of `path` if it has one.
fn ensure_parent(path: &Utf8Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Copies `src` to `dst`, following symlinks on the source side.
///
/// The destination keeps the source file's permission bits.
pub fn copy(src: &Utf8Path, dst: &Utf8Path) -> io::Result<()> {
    ensure_parent(dst)?;
    fs::copy(src, dst)?;
    Ok(())
}

/// Writes `content` to `path` atomically.
///
/// The content goes to a uniquely named sibling file which is then renamed
/// over `path`, so readers never observe a partially written file.
pub fn write(content: &str, path: &Utf8Path) -> io::Result<()> {
    ensure_parent(path)?;
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("path has no file name: {}", path))
    })?;
    let temp = temp_sibling(path, file_name);

    if let Err(e) = fs::write(&temp, content) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    Ok(())
}

fn temp_sibling(path: &Utf8Path, file_name: &str) -> Utf8PathBuf {
    path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()))
}

/// Removes a file, symlink or directory tree; a missing path is not an error.
pub fn remove_path(path: &Utf8Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Returns the permission bits (`0o7777` mask) of `path`.
#[cfg(unix)]
pub fn file_mode(path: &Utf8Path) -> io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::metadata(path)?.permissions().mode() & 0o7777)
}

/// Sets Unix file permissions on the given path.
#[cfg(unix)]
pub fn set_file_mode(path: &Utf8Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(mode);
    fs::set_permissions(path, perms)
}
