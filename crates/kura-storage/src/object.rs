//! Normalized file metadata.
//!
//! Every engine reports entries as [`FileObject`]s, whatever its native
//! notion of a file. Serializable so callers can ship listings over the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::path::PathInfo;

/// Metadata for one leaf entry.
///
/// Immutable once built. `path` is the identity: it is always
/// `directory/name` (or `name` for root-level entries) and unique within a
/// single listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileObject {
    name: String,
    directory: Option<String>,
    extension: Option<String>,
    path: String,
    size: u64,
    timestamp: i64,
}

impl FileObject {
    /// Build metadata for the entry at `path`.
    ///
    /// `timestamp` is seconds since the Unix epoch.
    pub fn new(path: &str, size: u64, timestamp: i64) -> Self {
        let PathInfo {
            name,
            directory,
            extension,
            path,
        } = PathInfo::parse(path);
        Self {
            name,
            directory,
            extension,
            path,
            size,
            timestamp,
        }
    }

    /// Leaf filename.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent path, `None` at the root.
    pub fn directory(&self) -> Option<&str> {
        self.directory.as_deref()
    }

    /// Extension without the dot.
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// Full path relative to the engine root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Modification (or write) time in seconds since the epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl fmt::Display for FileObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Seconds since the epoch for a `SystemTime`, clamped at zero.
pub(crate) fn unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Current time in seconds since the epoch.
pub(crate) fn now() -> i64 {
    unix_seconds(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_object_fields() {
        let object = FileObject::new("folder/subfolder/foo.txt", 32000, 1_572_532_800);
        assert_eq!(object.name(), "foo.txt");
        assert_eq!(object.directory(), Some("folder/subfolder"));
        assert_eq!(object.extension(), Some("txt"));
        assert_eq!(object.path(), "folder/subfolder/foo.txt");
        assert_eq!(object.size(), 32000);
        assert_eq!(object.timestamp(), 1_572_532_800);
        assert_eq!(object.to_string(), "folder/subfolder/foo.txt");
    }

    #[test]
    fn test_root_level_entry() {
        let object = FileObject::new("foo.txt", 3, 0);
        assert!(object.directory().is_none());
        assert_eq!(object.path(), "foo.txt");
    }

    #[test]
    fn test_serialize() {
        let object = FileObject::new("docs/a.md", 10, 5);
        let encoded = toml::to_string(&object).unwrap();
        assert!(encoded.contains("path = \"docs/a.md\""));
        let decoded: FileObject = toml::from_str(&encoded).unwrap();
        assert_eq!(decoded, object);
    }
}
