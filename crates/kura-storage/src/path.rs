//! Path utilities shared by every engine.
//!
//! Paths handed to engines are plain strings with `/` separators. Flat
//! backends have no directory nodes, so "is `a/b` under `a`" is always a
//! separator-bounded prefix test: `ab.txt` is never under `a`.

use crate::error::{StorageError, StorageResult};

/// Path separator used by every engine, whatever the host platform.
pub const SEPARATOR: char = '/';

/// A path decomposed into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    /// Leaf name.
    pub name: String,
    /// Parent path, `None` for root-level entries.
    pub directory: Option<String>,
    /// Extension of the leaf name, without the dot.
    pub extension: Option<String>,
    /// `directory/name`, or `name` alone.
    pub path: String,
}

impl PathInfo {
    /// Decompose `path`. Leading and trailing separators are ignored.
    pub fn parse(path: &str) -> Self {
        let trimmed = path.trim_matches(SEPARATOR);
        let (directory, name) = split(trimmed);
        Self {
            name: name.to_string(),
            directory: directory.map(str::to_string),
            extension: extension(name).map(str::to_string),
            path: trimmed.to_string(),
        }
    }
}

/// Returns true if `name` ends in a separator.
///
/// Engines refuse to delete such names: `delete("folder/")` is a no-op that
/// returns `false`.
pub fn is_protected(name: &str) -> bool {
    name.ends_with(SEPARATOR)
}

/// Normalize a caller-supplied name into canonical `a/b/c` form.
///
/// Empty segments and `.` are dropped. `..` is rejected: no engine lets a
/// caller climb out of its root.
pub fn normalize(name: &str) -> StorageResult<String> {
    let mut parts = Vec::new();
    for segment in name.split(SEPARATOR) {
        match segment {
            "" | "." => {}
            ".." => return Err(StorageError::invalid_path(name)),
            s => parts.push(s),
        }
    }
    Ok(parts.join("/"))
}

/// Split a normalized path into `(directory, name)`.
pub fn split(path: &str) -> (Option<&str>, &str) {
    match path.rsplit_once(SEPARATOR) {
        Some((dir, name)) if !dir.is_empty() => (Some(dir), name),
        Some((_, name)) => (None, name),
        None => (None, path),
    }
}

/// Extension of a leaf name.
///
/// Dotfiles such as `.env` have no extension, and neither does `archive.`.
pub fn extension(name: &str) -> Option<&str> {
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) if idx + 1 == name.len() => None,
        Some(idx) => Some(&name[idx + 1..]),
    }
}

/// Join a directory and a name. Either side may be empty.
pub fn join(directory: &str, name: &str) -> String {
    let directory = directory.trim_end_matches(SEPARATOR);
    let name = name.trim_start_matches(SEPARATOR);
    match (directory.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (_, true) => directory.to_string(),
        _ => format!("{directory}/{name}"),
    }
}

/// Strip `base` from a backend-native `path`, producing the caller-visible
/// relative path.
///
/// Paths outside `base` are returned with only their leading separators
/// removed.
pub fn rebase<'a>(path: &'a str, base: &str) -> &'a str {
    let base = base.trim_end_matches(SEPARATOR);
    if base.is_empty() {
        return path.trim_start_matches(SEPARATOR);
    }
    match path.strip_prefix(base) {
        Some("") => "",
        Some(rest) if rest.starts_with(SEPARATOR) => rest.trim_start_matches(SEPARATOR),
        _ => path.trim_start_matches(SEPARATOR),
    }
}

/// Returns true if `path` lies strictly beneath `directory`.
///
/// An empty `directory` is the root and contains everything.
pub fn is_within(path: &str, directory: &str) -> bool {
    if directory.is_empty() {
        return !path.is_empty();
    }
    path.len() > directory.len()
        && path.starts_with(directory)
        && path.as_bytes()[directory.len()] == b'/'
}

/// Returns true if `path` is `prefix` itself or lies beneath it.
pub fn matches_prefix(path: &str, prefix: &str) -> bool {
    path == prefix || is_within(path, prefix)
}

/// Every proper ancestor directory of `path`, outermost first.
///
/// `a/b/c.txt` yields `a`, then `a/b`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices(SEPARATOR)
        .map(move |(idx, _)| &path[..idx])
        .filter(|p| !p.is_empty())
}
