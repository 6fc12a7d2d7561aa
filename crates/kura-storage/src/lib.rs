//! Pluggable storage engines behind one contract.
//!
//! Callers read, write, delete, probe and list `/`-separated paths through
//! the [`Engine`] trait without caring where the bytes live:
//!
//! - [`LocalEngine`]: a directory on the local filesystem
//! - [`MemoryEngine`]: an in-process map
//! - [`ArchiveEngine`]: a single zip file
//! - [`RemoteObjectEngine`]: a bucket in an S3-style object store
//! - [`RemoteTreeEngine`]: a directory on an FTP-style file server
//!
//! Flat backends (memory, archive, object store) have no real directories.
//! They emulate them from key prefixes, always on a separator boundary, so
//! that `exists`, `delete` and `list` behave the same as on the hierarchical
//! backends.
//!
//! [`Storage`] maps volume names to engine configurations and builds each
//! engine lazily on first use:
//!
//! ```
//! use kura_storage::{EngineConfig, Options, Storage};
//!
//! let storage = Storage::new();
//! storage.configure("default", EngineConfig::Memory).unwrap();
//! storage.write("docs/readme.md", b"hello", Options::default()).unwrap();
//! assert!(storage.exists("docs", Options::default()).unwrap());
//! ```

pub mod client;
pub mod config;
pub mod engine;
pub mod engines;
pub mod error;
pub mod object;
pub mod path;
pub mod storage;

pub use config::{
    ArchiveConfig, Credentials, DEFAULT_VOLUME, EngineConfig, LocalConfig, RemoteObjectConfig,
    RemoteTreeConfig, StorageConfig,
};
pub use engine::{Engine, EngineKind};
pub use engines::{ArchiveEngine, LocalEngine, MemoryEngine, RemoteObjectEngine, RemoteTreeEngine};
pub use error::{ErrorKind, StorageError, StorageResult};
pub use object::FileObject;
pub use storage::{EngineHandle, Options, Storage};
