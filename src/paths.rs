//! Path resolution utilities shared by the pipeline and the store
//!
//! Indexed `file_path` values are always written canonicalized-absolute;
//! everything that compares paths goes through these helpers first so
//! Windows and Unix separators never leak into keys.

use std::path::{Path, PathBuf};

/// Canonicalize a path, falling back to an absolute join against the
/// current directory when the file no longer exists.
pub fn canonicalize_path(path: &Path) -> PathBuf {
    match path.canonicalize() {
        Ok(p) => p,
        Err(_) => {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(path))
                    .unwrap_or_else(|_| path.to_path_buf())
            }
        }
    }
}

/// Render a path with forward slashes regardless of platform
pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// Last path segment (file name) of a separator-normalized string path
pub fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// File stem (name without the final extension) of a string path
pub fn file_stem(path: &str) -> &str {
    let name = file_name(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// Immediate parent directory name of a string path, if any
pub fn parent_dir_name(path: &str) -> Option<&str> {
    let normalized_end = path.trim_end_matches(['/', '\\']);
    let without_file = &normalized_end[..normalized_end.len() - file_name(normalized_end).len()];
    let trimmed = without_file.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        return None;
    }
    let parent = trimmed.rsplit(['/', '\\']).next()?;
    if parent.is_empty() {
        None
    } else {
        Some(parent)
    }
}

/// Ensure a directory exists, creating parents as needed
pub fn ensure_directory(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
