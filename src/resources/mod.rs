//! Step handlers: one module per step kind.
//!
//! Each handler performs its action and returns the diagnostic output on
//! success, or a [`StepError`](crate::core::error::StepError) of its kind.
//! Handlers never evaluate idempotence checks; the executor does that first.

pub mod build;
pub mod env;
pub mod package;
pub mod patch;

use std::io::Write;
use std::path::{Path, PathBuf};

const MAX_LINK_HOPS: usize = 40;

/// Follow symlinks from `path` to the file they name. A dangling link
/// resolves to its (missing) destination so the write creates it there.
fn resolve_links(path: &Path) -> std::io::Result<PathBuf> {
    let mut current = path.to_path_buf();
    for _ in 0..MAX_LINK_HOPS {
        match std::fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let dest = std::fs::read_link(&current)?;
                current = match current.parent() {
                    Some(dir) if dest.is_relative() => dir.join(dest),
                    _ => dest,
                };
            }
            Ok(_) => return Ok(current),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(current),
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::other(format!(
        "{}: too many levels of symbolic links",
        path.display()
    )))
}

/// Replace `path` with `content` atomically (temp file in the same dir + rename).
/// Symlinks are followed, so the link stays and its destination is replaced.
/// Keeps the existing file's permissions; new files get 0644.
pub(crate) fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let resolved = resolve_links(path)?;
    let path = resolved.as_path();
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let existing = std::fs::metadata(path).ok();

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;

    match existing {
        Some(meta) => std::fs::set_permissions(tmp.path(), meta.permissions())?,
        None => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o644))?;
            }
        }
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
