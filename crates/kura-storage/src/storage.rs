//! Storage facade.
//!
//! Routes each call to the engine for a named volume. Engines are built on
//! first use from the volume's configuration and cached for the lifetime of
//! the [`Storage`]; a failed build is not cached, so the next call retries.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::client::{ObjectConnector, TreeConnector};
use crate::config::{DEFAULT_VOLUME, EngineConfig, StorageConfig};
use crate::engine::Engine;
use crate::engines::{ArchiveEngine, LocalEngine, MemoryEngine, RemoteObjectEngine, RemoteTreeEngine};
use crate::error::{StorageError, StorageResult};
use crate::object::FileObject;

/// Shared handle to a cached engine. The mutex serializes calls per engine.
pub type EngineHandle = Arc<Mutex<Box<dyn Engine>>>;

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options<'a> {
    /// Volume to use; the storage's default volume when `None`.
    pub config: Option<&'a str>,
}

impl<'a> Options<'a> {
    /// Select a volume by name.
    pub fn config(name: &'a str) -> Self {
        Self { config: Some(name) }
    }
}

/// Registry of named volumes with a lazily populated engine cache.
pub struct Storage {
    default: String,
    volumes: RwLock<BTreeMap<String, EngineConfig>>,
    engines: Mutex<BTreeMap<String, EngineHandle>>,
    object_connector: Option<Arc<dyn ObjectConnector>>,
    tree_connector: Option<Arc<dyn TreeConnector>>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("default", &self.default)
            .field("volumes", &self.volume_names())
            .field("cached", &self.engines.lock().keys().cloned().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage {
    /// Create a storage with no volumes.
    pub fn new() -> Self {
        Self {
            default: DEFAULT_VOLUME.to_string(),
            volumes: RwLock::new(BTreeMap::new()),
            engines: Mutex::new(BTreeMap::new()),
            object_connector: None,
            tree_connector: None,
        }
    }

    /// Create a storage from a parsed configuration file.
    pub fn from_config(config: StorageConfig) -> StorageResult<Self> {
        let storage = Self::new().with_default(config.default);
        for (name, volume) in config.volumes {
            storage.configure(name, volume)?;
        }
        Ok(storage)
    }

    /// Volume used when a call does not select one.
    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default = name.into();
        self
    }

    /// Connector used to build `remote-object` volumes.
    pub fn with_object_connector(mut self, connector: impl ObjectConnector + 'static) -> Self {
        self.object_connector = Some(Arc::new(connector));
        self
    }

    /// Connector used to build `remote-tree` volumes.
    pub fn with_tree_connector(mut self, connector: impl TreeConnector + 'static) -> Self {
        self.tree_connector = Some(Arc::new(connector));
        self
    }

    /// Name of the default volume.
    pub fn default_volume(&self) -> &str {
        &self.default
    }

    /// Names of every configured volume.
    pub fn volume_names(&self) -> Vec<String> {
        self.volumes.read().keys().cloned().collect()
    }

    /// Register or replace a volume.
    ///
    /// The settings are validated first. A cached engine for the same name
    /// is closed and evicted, so the next call builds from the new settings.
    pub fn configure(&self, name: impl Into<String>, config: EngineConfig) -> StorageResult<()> {
        let name = name.into();
        config
            .validate()
            .map_err(|e| StorageError::configuration(format!("volume {name}: {e}")))?;
        tracing::debug!(volume = %name, engine = %config.kind(), "volume configured");
        self.volumes.write().insert(name.clone(), config);
        self.close(&name)?;
        Ok(())
    }

    /// The cached engine for a volume, building it on first use.
    ///
    /// Unknown volume names are a configuration error.
    pub fn volume(&self, name: &str) -> StorageResult<EngineHandle> {
        let mut engines = self.engines.lock();
        if let Some(handle) = engines.get(name) {
            return Ok(Arc::clone(handle));
        }

        let config = self
            .volumes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::configuration(format!("unknown volume {name}")))?;
        let engine = self.build(name, &config)?;
        tracing::info!(volume = name, engine = %config.kind(), "engine built");

        let handle: EngineHandle = Arc::new(Mutex::new(engine));
        engines.insert(name.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// The engine selected by `opts`.
    pub fn engine(&self, opts: Options<'_>) -> StorageResult<EngineHandle> {
        self.volume(opts.config.unwrap_or(&self.default))
    }

    /// Close and evict a cached engine.
    ///
    /// Returns false if no engine was cached under `name`.
    pub fn close(&self, name: &str) -> StorageResult<bool> {
        let Some(handle) = self.engines.lock().remove(name) else {
            return Ok(false);
        };
        tracing::debug!(volume = name, "closing engine");
        handle.lock().close()?;
        Ok(true)
    }

    /// Close every cached engine, reporting the first failure.
    pub fn close_all(&self) -> StorageResult<()> {
        let handles: Vec<_> = std::mem::take(&mut *self.engines.lock()).into_iter().collect();
        let mut first_error = None;
        for (name, handle) in handles {
            if let Err(e) = handle.lock().close() {
                tracing::warn!(volume = %name, error = %e, "engine close failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn build(&self, name: &str, config: &EngineConfig) -> StorageResult<Box<dyn Engine>> {
        let engine: Box<dyn Engine> = match config {
            EngineConfig::Local(c) => Box::new(LocalEngine::new(c)?),
            EngineConfig::Memory => Box::new(MemoryEngine::new()),
            EngineConfig::Archive(c) => Box::new(ArchiveEngine::open(c)?),
            EngineConfig::RemoteObject(c) => {
                let connector = self.object_connector.as_deref().ok_or_else(|| {
                    StorageError::configuration(format!(
                        "volume {name}: no object store connector registered"
                    ))
                })?;
                Box::new(RemoteObjectEngine::connect(c, connector)?)
            }
            EngineConfig::RemoteTree(c) => {
                let connector = self.tree_connector.as_deref().ok_or_else(|| {
                    StorageError::configuration(format!(
                        "volume {name}: no file server connector registered"
                    ))
                })?;
                Box::new(RemoteTreeEngine::connect(c, connector)?)
            }
        };
        Ok(engine)
    }

    /// Read the leaf entry at `name`.
    pub fn read(&self, name: &str, opts: Options<'_>) -> StorageResult<Vec<u8>> {
        tracing::debug!(volume = opts.config, name, "read");
        self.engine(opts)?.lock().read(name)
    }

    /// Create or overwrite the leaf entry at `name`.
    pub fn write(&self, name: &str, data: &[u8], opts: Options<'_>) -> StorageResult<bool> {
        tracing::debug!(volume = opts.config, name, size = data.len(), "write");
        self.engine(opts)?.lock().write(name, data)
    }

    /// Delete a leaf entry or a directory tree.
    pub fn delete(&self, name: &str, opts: Options<'_>) -> StorageResult<bool> {
        tracing::debug!(volume = opts.config, name, "delete");
        self.engine(opts)?.lock().delete(name)
    }

    /// Whether `name` is a leaf entry or a non-empty directory.
    ///
    /// Only fails if the volume itself cannot be built.
    pub fn exists(&self, name: &str, opts: Options<'_>) -> StorageResult<bool> {
        tracing::debug!(volume = opts.config, name, "exists");
        Ok(self.engine(opts)?.lock().exists(name))
    }

    /// Every leaf entry at or beneath `prefix`.
    pub fn list(&self, prefix: Option<&str>, opts: Options<'_>) -> StorageResult<Vec<FileObject>> {
        tracing::debug!(volume = opts.config, prefix, "list");
        self.engine(opts)?.lock().list(prefix)
    }
}
