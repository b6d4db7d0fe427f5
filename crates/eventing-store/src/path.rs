//! Helpers for slash-delimited store paths.

use crate::error::{StoreError, StoreResult};

/// Check that a path is absolute with no empty segments.
pub fn validate(path: &str) -> StoreResult<()> {
    if path == "/" {
        return Ok(());
    }
    if !path.starts_with('/') || path.ends_with('/') || path.contains("//") {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Parent of `path`, or `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of `path`.
pub fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Join a relative segment (which may itself contain `/`) onto `base`.
pub fn join(base: &str, relative: &str) -> String {
    let relative = relative.trim_matches('/');
    if base == "/" {
        format!("/{}", relative)
    } else {
        format!("{}/{}", base.trim_end_matches('/'), relative)
    }
}

/// Whether `path` equals `ancestor` or lies below it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor == "/" || path == ancestor {
        return true;
    }
    path.len() > ancestor.len() && path.starts_with(ancestor) && path.as_bytes()[ancestor.len()] == b'/'
}
