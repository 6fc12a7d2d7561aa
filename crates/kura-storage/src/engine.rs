//! The storage contract.
//!
//! Every backend implements [`Engine`] with identical observable behavior,
//! so callers can swap backends through configuration alone.

use strum::{AsRefStr, Display, EnumString};

use crate::error::StorageResult;
use crate::object::FileObject;

/// Which backend an engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum EngineKind {
    /// Hierarchical filesystem under a root directory.
    Local,
    /// In-process map.
    Memory,
    /// Single packed archive file.
    Archive,
    /// Flat-namespace remote object store.
    RemoteObject,
    /// Tree-based remote file server.
    RemoteTree,
}

/// Core storage operations.
///
/// Names are `/`-separated paths relative to the engine root. Flat backends
/// emulate directories from key prefixes, so `exists`, `delete` and `list`
/// treat `a` as a directory whenever some entry lives under `a/`.
///
/// Engines are blocking and not meant for concurrent callers; the
/// [`Storage`](crate::Storage) facade serializes access per instance.
pub trait Engine: Send {
    /// Which backend this is.
    fn kind(&self) -> EngineKind;

    /// Read the full contents of the leaf entry at `name`.
    ///
    /// Fails with `NotFound` if `name` is not an existing leaf.
    fn read(&mut self, name: &str) -> StorageResult<Vec<u8>>;

    /// Create or overwrite the leaf entry at `name`.
    ///
    /// Intermediate directories are created as needed. Either the whole
    /// payload is stored or the call fails.
    fn write(&mut self, name: &str, data: &[u8]) -> StorageResult<bool>;

    /// Delete a leaf entry, or a directory and everything beneath it.
    ///
    /// A `name` ending in `/` is refused: the call returns `Ok(false)` without
    /// touching storage. Fails with `NotFound` if nothing lives at `name`.
    fn delete(&mut self, name: &str) -> StorageResult<bool>;

    /// Returns true if `name` is a leaf entry or a non-empty directory.
    ///
    /// Backend errors while probing degrade to `false`.
    fn exists(&mut self, name: &str) -> bool;

    /// Every leaf entry at or beneath `prefix`, recursively.
    ///
    /// `None` (or an empty prefix) lists the whole store. Directory markers
    /// are never returned. Fails with `NotFound` if a non-empty prefix
    /// addresses nothing. Ordering is deterministic for a fixed state.
    fn list(&mut self, prefix: Option<&str>) -> StorageResult<Vec<FileObject>>;

    /// Release the backend session or commit staged state.
    ///
    /// Called by the facade when a volume is closed. Engines without
    /// anything to release keep the default.
    fn close(&mut self) -> StorageResult<()> {
        Ok(())
    }
}
