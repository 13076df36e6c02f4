//! Atomic file writes
//!
//! Writers create a temporary file next to the target and rename it over
//! the destination, so a failed write never leaves a truncated file behind.

use std::io::Write;
use std::path::Path;

use crate::error::{CoreError, Result};

/// Write `contents` to `path` atomically
///
/// Existing permissions are preserved; new files get `0644` on Unix.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mode = existing_mode(path).unwrap_or(0o644);
    write_with_mode(path, contents, mode)
}

/// Write `contents` to `path` atomically, readable only by the owner
pub fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    write_with_mode(path, contents, 0o600)
}

fn write_with_mode(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    std::fs::create_dir_all(parent).map_err(|e| CoreError::file(parent, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| CoreError::file(parent, e))?;
    tmp.write_all(contents).map_err(|e| CoreError::file(path, e))?;
    tmp.as_file().sync_all().map_err(|e| CoreError::file(path, e))?;
    set_mode(tmp.path(), mode)?;

    tmp.persist(path).map_err(|e| CoreError::file(path, e.error))?;
    tracing::debug!(path = %path.display(), bytes = contents.len(), "wrote file");
    Ok(())
}

#[cfg(unix)]
fn existing_mode(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).ok().map(|m| m.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn existing_mode(_path: &Path) -> Option<u32> {
    None
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| CoreError::file(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
