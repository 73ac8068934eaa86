//! Crash-safe file replacement: write a sibling temp file, fsync, rename over.

use std::io::Write;
use std::path::{Path, PathBuf};

/// Symlink hops followed for a target that does not exist yet.
const MAX_LINK_HOPS: usize = 40;

/// Replace `path` with `contents` atomically.
///
/// The temp file lives in the destination directory so the final rename never
/// crosses filesystems. If anything fails before the rename, the temp file is
/// deleted when it drops and `path` keeps its previous content. Permissions
/// of an existing `path` are carried over.
///
/// If `path` is a symlink, the file it points to is replaced and the link is
/// left in place.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let target = resolve_target(path)?;
    let path = target.as_path();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".crypter-")
        .suffix(".tmp")
        .tempfile_in(dir)?;

    if let Ok(meta) = std::fs::metadata(path) {
        tmp.as_file().set_permissions(meta.permissions())?;
    }

    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// The path a write to `path` must land on: `path` itself unless it is a
/// symlink, in which case the link chain is followed even when it dangles.
fn resolve_target(path: &Path) -> std::io::Result<PathBuf> {
    let mut current = path.to_path_buf();
    for _ in 0..MAX_LINK_HOPS {
        match std::fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {}
            _ => return Ok(current),
        }
        if let Ok(resolved) = std::fs::canonicalize(&current) {
            return Ok(resolved);
        }
        let link = std::fs::read_link(&current)?;
        current = match current.parent() {
            Some(parent) if link.is_relative() => parent.join(link),
            _ => link,
        };
    }
    Err(std::io::Error::other(format!(
        "too many levels of symbolic links: {}",
        path.display()
    )))
}
