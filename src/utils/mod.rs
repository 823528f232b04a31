//! src/utils/mod.rs
//! Shared utility functions used across the codebase

use std::fmt::Display;
use std::path::Path;

/// Extension trait for Result to simplify error conversion to String.
pub trait ResultExt<T, E> {
    fn str_err(self) -> Result<T, String>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    fn str_err(self) -> Result<T, String> {
        self.map_err(|e| e.to_string())
    }
}

/// Convert a Path to an owned String, replacing invalid UTF-8 with U+FFFD.
pub fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Get a path relative to a base, falling back to the original path if not a prefix.
pub fn relative_to<'a>(path: &'a Path, base: &Path) -> &'a Path {
    path.strip_prefix(base).unwrap_or(path)
}

/// Truncate a string to max length with ellipsis.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", truncate_at_boundary(s, max_len))
    }
}

/// Truncate `s` to at most `max_len` bytes, backing off to the nearest char
/// boundary so multi-byte UTF-8 sequences are never split.
pub fn truncate_at_boundary(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
