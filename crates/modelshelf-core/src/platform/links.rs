//! Platform-specific symbolic link handling.
//!
//! Previews and companion links are file symlinks. A link is replaced by
//! removing the old one first, so callers never see a half-updated target.

use crate::error::{Result, ShelfError};
use std::path::Path;
use tracing::debug;

/// Whether a path exists as a link or file, including dangling links.
pub fn path_present(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// Whether `path` is a symlink (dangling or not).
pub fn is_symlink(path: &Path) -> bool {
    path.symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Create (or replace) a file symlink at `link` pointing at `target`.
///
/// # Platform Behavior
/// - **Linux/macOS**: `symlink(2)`
/// - **Windows**: `CreateSymbolicLink` for files; requires developer mode or
///   elevated rights
pub fn replace_file_symlink(target: &Path, link: &Path) -> Result<()> {
    remove_if_present(link)?;

    #[cfg(unix)]
    let created = std::os::unix::fs::symlink(target, link);

    #[cfg(windows)]
    let created = std::os::windows::fs::symlink_file(target, link);

    created.map_err(|e| ShelfError::SymlinkFailed {
        src: target.to_path_buf(),
        dest: link.to_path_buf(),
        reason: e.to_string(),
    })?;

    debug!("Linked {} -> {}", link.display(), target.display());
    Ok(())
}

/// Remove a file or link if present. Returns whether something was removed.
pub fn remove_if_present(path: &Path) -> Result<bool> {
    if !path_present(path) {
        return Ok(false);
    }
    std::fs::remove_file(path).map_err(|e| ShelfError::io_with_path(e, path))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_replace_symlink() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.png");
        let b = temp.path().join("b.png");
        let link = temp.path().join("m.preview.png");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        replace_file_symlink(&a, &link).unwrap();
        assert!(is_symlink(&link));
        replace_file_symlink(&b, &link).unwrap();
        assert_eq!(std::fs::read(&link).unwrap(), b"b");
    }

    #[test]
    fn test_remove_dangling_link() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("gone.pt");
        let link = temp.path().join("m.vae.pt");
        std::fs::write(&target, b"x").unwrap();
        replace_file_symlink(&target, &link).unwrap();
        std::fs::remove_file(&target).unwrap();

        assert!(!link.exists());
        assert!(path_present(&link));
        assert!(remove_if_present(&link).unwrap());
        assert!(!path_present(&link));
        assert!(!remove_if_present(&link).unwrap());
    }
}
