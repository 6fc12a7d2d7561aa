//! Local filesystem engine.
//!
//! Every name resolves beneath a canonical root directory. Names that would
//! climb out of the root are refused.

use fs2::FileExt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::config::LocalConfig;
use crate::engine::{Engine, EngineKind};
use crate::error::{StorageError, StorageResult};
use crate::object::{FileObject, unix_seconds};
use crate::path;

/// Mode for directories created by `write`.
#[cfg(unix)]
const DIRECTORY_MODE: u32 = 0o755;

/// Mode for files created by `write`.
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

/// Advisory lock held for the duration of one call.
///
/// Released on drop, whichever way the call exits.
struct FileLock<'a> {
    file: &'a File,
}

impl<'a> FileLock<'a> {
    fn shared(file: &'a File) -> io::Result<Self> {
        file.lock_shared()?;
        Ok(Self { file })
    }

    fn exclusive(file: &'a File) -> io::Result<Self> {
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file);
    }
}

/// Engine over a real directory tree.
///
/// For a root of `/srv/files`, `read("docs/a.txt")` reads
/// `/srv/files/docs/a.txt`.
#[derive(Debug, Clone)]
pub struct LocalEngine {
    root: PathBuf,
    lock: bool,
}

impl LocalEngine {
    /// Open an engine over `config.root`, which must be an existing
    /// directory.
    ///
    /// The root is canonicalized once, so symlinked roots (e.g. macOS
    /// `/tmp` → `/private/tmp`) compare correctly later.
    pub fn new(config: &LocalConfig) -> StorageResult<Self> {
        config.validate()?;
        let root = dunce::canonicalize(&config.root).map_err(|e| {
            StorageError::configuration(format!(
                "local: root {} is not accessible: {e}",
                config.root.display()
            ))
        })?;
        if !root.is_dir() {
            return Err(StorageError::configuration(format!(
                "local: root {} is not a directory",
                root.display()
            )));
        }
        tracing::info!(root = %root.display(), lock = config.lock, "local engine ready");
        Ok(Self {
            root,
            lock: config.lock,
        })
    }

    /// The canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a name to a path beneath the root.
    ///
    /// The target, or for a path that does not exist yet its nearest
    /// existing ancestor, is canonicalized so a symlink pointing outside the
    /// root is refused.
    fn resolve(&self, name: &str) -> StorageResult<(String, PathBuf)> {
        let relative = path::normalize(name)?;
        let full = self.root.join(&relative);

        let existing = full
            .ancestors()
            .find(|p| fs::symlink_metadata(p).is_ok())
            .unwrap_or(self.root.as_path());
        let canonical = match dunce::canonicalize(existing) {
            Ok(canonical) => canonical,
            // Dangling link: its target is unknown, refuse it.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::invalid_path(name));
            }
            Err(e) => return Err(e.into()),
        };
        if !canonical.starts_with(&self.root) {
            return Err(StorageError::invalid_path(format!(
                "{} is not under {}",
                canonical.display(),
                self.root.display()
            )));
        }
        Ok((relative, full))
    }

    /// Caller-visible path of a file beneath the root.
    fn relative(&self, full: &Path) -> String {
        full.strip_prefix(&self.root)
            .unwrap_or(full)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn create_parents(&self, full: &Path) -> StorageResult<()> {
        let Some(parent) = full.parent() else {
            return Ok(());
        };
        if parent.is_dir() {
            return Ok(());
        }
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(DIRECTORY_MODE);
        }
        builder.create(parent)?;
        Ok(())
    }

    fn remove_tree(&self, full: &Path) -> StorageResult<()> {
        for entry in WalkDir::new(full).contents_first(true) {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_dir() {
                fs::remove_dir(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

impl Engine for LocalEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Local
    }

    fn read(&mut self, name: &str) -> StorageResult<Vec<u8>> {
        let (_, full) = self.resolve(name)?;
        if !full.is_file() {
            return Err(StorageError::not_found(name));
        }

        let file = File::open(&full)?;
        let _lock = if self.lock {
            Some(FileLock::shared(&file).map_err(|e| {
                StorageError::backend(format!("cannot lock {name}: {e}"))
            })?)
        } else {
            None
        };
        let mut data = Vec::new();
        (&file).read_to_end(&mut data)?;
        Ok(data)
    }

    fn write(&mut self, name: &str, data: &[u8]) -> StorageResult<bool> {
        let (relative, full) = self.resolve(name)?;
        if relative.is_empty() || path::is_protected(name) {
            return Err(StorageError::invalid_path(name));
        }
        self.create_parents(&full)?;
        let parent = full.parent().unwrap_or(self.root.as_path());

        // Writers serialize on the file being replaced; readers holding it
        // keep seeing the old contents.
        let current = if self.lock { File::open(&full).ok() } else { None };
        let _lock = match &current {
            Some(file) => Some(FileLock::exclusive(file).map_err(|e| {
                StorageError::backend(format!("cannot lock {name}: {e}"))
            })?),
            None => None,
        };

        let mut temp = NamedTempFile::new_in(parent)?;
        temp.write_all(data)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = match &current {
                Some(file) => file.metadata()?.permissions(),
                None => match fs::metadata(&full) {
                    Ok(meta) => meta.permissions(),
                    Err(_) => fs::Permissions::from_mode(FILE_MODE),
                },
            };
            temp.as_file().set_permissions(permissions)?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&full).map_err(|e| e.error)?;
        Ok(true)
    }

    fn delete(&mut self, name: &str) -> StorageResult<bool> {
        if path::is_protected(name) {
            return Ok(false);
        }
        let (relative, full) = self.resolve(name)?;
        if relative.is_empty() {
            return Err(StorageError::not_found(name));
        }

        let meta = match fs::symlink_metadata(&full) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(name));
            }
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            tracing::debug!(directory = %relative, "local: removing tree");
            self.remove_tree(&full)?;
        } else {
            fs::remove_file(&full)?;
        }
        Ok(true)
    }

    fn exists(&mut self, name: &str) -> bool {
        match self.resolve(name) {
            Ok((relative, full)) => !relative.is_empty() && full.exists(),
            Err(_) => false,
        }
    }

    fn list(&mut self, prefix: Option<&str>) -> StorageResult<Vec<FileObject>> {
        let (relative, full) = self.resolve(prefix.unwrap_or(""))?;
        if !relative.is_empty() && !full.exists() {
            return Err(StorageError::not_found(relative));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&full).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_dir() {
                continue;
            }
            let meta = entry.metadata().map_err(io::Error::from)?;
            let timestamp = meta.modified().map(unix_seconds).unwrap_or(0);
            files.push(FileObject::new(
                &self.relative(entry.path()),
                meta.len(),
                timestamp,
            ));
        }
        Ok(files)
    }
}
