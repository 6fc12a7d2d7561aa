//! In-memory engine.
//!
//! Entries are grouped by parent directory, so directory questions become
//! separator-bounded prefix checks over the group keys. All data is lost
//! when the engine is dropped.

use std::collections::BTreeMap;

use crate::engine::{Engine, EngineKind};
use crate::error::{StorageError, StorageResult};
use crate::object::{FileObject, now};
use crate::path;

#[derive(Debug, Clone)]
struct Entry {
    object: FileObject,
    data: Vec<u8>,
}

/// In-process engine backed by ordered maps.
///
/// The outer map is keyed by directory (`""` for root-level entries), the
/// inner map by leaf name. Empty groups are removed, so a directory exists
/// exactly when some group key is it or lies beneath it.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    directories: BTreeMap<String, BTreeMap<String, Entry>>,
}

impl MemoryEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored leaf entries.
    pub fn len(&self) -> usize {
        self.directories.values().map(BTreeMap::len).sum()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.directories.is_empty()
    }

    /// Directory groups currently holding entries, in order. `""` is the
    /// root group.
    pub fn directories(&self) -> impl Iterator<Item = &str> {
        self.directories.keys().map(String::as_str)
    }

    fn leaf_name(name: &str) -> StorageResult<String> {
        let normalized = path::normalize(name)?;
        if normalized.is_empty() || path::is_protected(name) {
            return Err(StorageError::invalid_path(name));
        }
        Ok(normalized)
    }

    fn entry(&self, path: &str) -> Option<&Entry> {
        let (directory, name) = path::split(path);
        self.directories
            .get(directory.unwrap_or(""))
            .and_then(|group| group.get(name))
    }

    fn is_directory(&self, path: &str) -> bool {
        !path.is_empty()
            && self
                .directories
                .keys()
                .any(|key| path::matches_prefix(key, path))
    }

    fn is_file(&self, path: &str) -> bool {
        self.entry(path).is_some()
    }
}

impl Engine for MemoryEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Memory
    }

    fn read(&mut self, name: &str) -> StorageResult<Vec<u8>> {
        let path = path::normalize(name)?;
        self.entry(&path)
            .map(|entry| entry.data.clone())
            .ok_or_else(|| StorageError::not_found(name))
    }

    fn write(&mut self, name: &str, data: &[u8]) -> StorageResult<bool> {
        let path = Self::leaf_name(name)?;
        let object = FileObject::new(&path, data.len() as u64, now());
        let (directory, leaf) = path::split(&path);
        self.directories
            .entry(directory.unwrap_or("").to_string())
            .or_default()
            .insert(
                leaf.to_string(),
                Entry {
                    object,
                    data: data.to_vec(),
                },
            );
        Ok(true)
    }

    fn delete(&mut self, name: &str) -> StorageResult<bool> {
        if path::is_protected(name) {
            return Ok(false);
        }
        let path = path::normalize(name)?;
        if path.is_empty() {
            return Err(StorageError::not_found(name));
        }

        let (directory, leaf) = path::split(&path);
        let directory = directory.unwrap_or("");
        if let Some(group) = self.directories.get_mut(directory) {
            if group.remove(leaf).is_some() {
                if group.is_empty() {
                    self.directories.remove(directory);
                }
                return Ok(true);
            }
        }

        let before = self.directories.len();
        self.directories
            .retain(|key, _| !path::matches_prefix(key, &path));
        if self.directories.len() == before {
            return Err(StorageError::not_found(name));
        }
        tracing::debug!(directory = %path, "memory: removed directory");
        Ok(true)
    }

    fn exists(&mut self, name: &str) -> bool {
        match path::normalize(name) {
            Ok(path) => self.is_file(&path) || self.is_directory(&path),
            Err(_) => false,
        }
    }

    fn list(&mut self, prefix: Option<&str>) -> StorageResult<Vec<FileObject>> {
        let prefix = path::normalize(prefix.unwrap_or(""))?;
        if !prefix.is_empty() && !self.is_file(&prefix) && !self.is_directory(&prefix) {
            return Err(StorageError::not_found(prefix));
        }

        Ok(self
            .directories
            .values()
            .flat_map(BTreeMap::values)
            .filter(|entry| prefix.is_empty() || path::matches_prefix(entry.object.path(), &prefix))
            .map(|entry| entry.object.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(objects: &[FileObject]) -> Vec<&str> {
        objects.iter().map(FileObject::path).collect()
    }

    #[test]
    fn test_write_and_read() {
        let mut engine = MemoryEngine::new();
        assert!(engine.write("docs/readme.md", b"hello").unwrap());
        assert_eq!(engine.read("docs/readme.md").unwrap(), b"hello");
        assert_eq!(engine.read("/docs//readme.md").unwrap(), b"hello");
        assert!(engine.read("docs/missing.md").unwrap_err().is_not_found());
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_write_rejects_bad_names() {
        let mut engine = MemoryEngine::new();
        assert!(engine.write("", b"x").is_err());
        assert!(engine.write("folder/", b"x").is_err());
        assert!(engine.write("../escape.txt", b"x").is_err());
        assert!(engine.is_empty());
    }

    #[test]
    fn test_prefix_is_separator_bounded() {
        let mut engine = MemoryEngine::new();
        engine.write("ab.txt", b"1").unwrap();
        engine.write("abc/d.txt", b"2").unwrap();
        assert!(!engine.exists("a"));
        assert!(!engine.exists("ab"));
        assert!(engine.exists("abc"));
        assert!(engine.delete("ab").unwrap_err().is_not_found());
        assert_eq!(paths(&engine.list(Some("abc")).unwrap()), vec!["abc/d.txt"]);
    }

    #[test]
    fn test_delete_directory_drops_groups() {
        let mut engine = MemoryEngine::new();
        engine.write("a/1.txt", b"1").unwrap();
        engine.write("a/b/2.txt", b"2").unwrap();
        engine.write("c.txt", b"3").unwrap();

        assert!(engine.delete("a").unwrap());
        assert!(!engine.exists("a"));
        assert!(!engine.exists("a/b"));
        assert_eq!(engine.directories().collect::<Vec<_>>(), vec![""]);
        assert_eq!(paths(&engine.list(None).unwrap()), vec!["c.txt"]);
    }

    #[test]
    fn test_list_ordered_by_directory() {
        let mut engine = MemoryEngine::new();
        engine.write("z.txt", b"").unwrap();
        engine.write("b/2.txt", b"").unwrap();
        engine.write("a/1.txt", b"").unwrap();
        engine.write("b/1.txt", b"").unwrap();
        assert_eq!(
            paths(&engine.list(None).unwrap()),
            vec!["z.txt", "a/1.txt", "b/1.txt", "b/2.txt"]
        );
    }

    #[test]
    fn test_list_single_leaf() {
        let mut engine = MemoryEngine::new();
        engine.write("a/1.txt", b"abc").unwrap();
        let listed = engine.list(Some("a/1.txt")).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size(), 3);
    }
}
