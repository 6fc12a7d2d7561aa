//! Archive engine.
//!
//! One zip file holds the whole volume. The archive is loaded at
//! construction, changes are staged in memory, and [`ArchiveEngine::close`]
//! writes them back atomically (temp file + rename). Dropping a dirty engine
//! commits too, but failures there can only be logged.
//!
//! Entries ending in `/` are directory markers. They never show up in
//! listings and are not delete candidates on their own, but they make a
//! directory exist and are removed with it.

use chrono::{Datelike, NaiveDate, Timelike};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::ArchiveConfig;
use crate::engine::{Engine, EngineKind};
use crate::error::{StorageError, StorageResult};
use crate::object::{FileObject, now};
use crate::path::{self, SEPARATOR};

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    timestamp: i64,
}

/// Engine over a single zip archive.
#[derive(Debug)]
pub struct ArchiveEngine {
    file: PathBuf,
    /// Archive entry name -> contents. Marker names end in `/`.
    entries: BTreeMap<String, Entry>,
    dirty: bool,
}

fn marker(directory: &str) -> String {
    format!("{directory}{SEPARATOR}")
}

fn is_marker(key: &str) -> bool {
    key.ends_with(SEPARATOR)
}

/// Zip timestamps are local-less calendar values; they are treated as UTC.
fn from_zip_time(time: zip::DateTime) -> i64 {
    NaiveDate::from_ymd_opt(time.year().into(), time.month().into(), time.day().into())
        .and_then(|date| {
            date.and_hms_opt(
                time.hour().into(),
                time.minute().into(),
                time.second().into(),
            )
        })
        .map(|t| t.and_utc().timestamp())
        .unwrap_or(0)
}

/// Out-of-range times (zip covers 1980..=2107) fall back to the zip epoch.
fn to_zip_time(timestamp: i64) -> zip::DateTime {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .and_then(|t| {
            zip::DateTime::from_date_and_time(
                u16::try_from(t.year()).ok()?,
                t.month() as u8,
                t.day() as u8,
                t.hour() as u8,
                t.minute() as u8,
                t.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}

impl ArchiveEngine {
    /// Open `config.file`, creating an empty archive if it does not exist.
    ///
    /// An unreadable or corrupt archive, or a missing parent directory, is a
    /// configuration error.
    pub fn open(config: &ArchiveConfig) -> StorageResult<Self> {
        config.validate()?;
        let file = config.file.clone();

        let mut engine = Self {
            file,
            entries: BTreeMap::new(),
            dirty: false,
        };

        if engine.file.exists() {
            engine.entries = load(&engine.file).map_err(|e| {
                StorageError::configuration(format!(
                    "archive: cannot open {}: {e}",
                    engine.file.display()
                ))
            })?;
        } else {
            engine.dirty = true;
            if let Err(e) = engine.commit() {
                engine.dirty = false;
                return Err(StorageError::configuration(format!(
                    "archive: cannot create {}: {e}",
                    engine.file.display()
                )));
            }
        }

        tracing::info!(
            file = %engine.file.display(),
            entries = engine.entries.len(),
            "archive engine ready"
        );
        Ok(engine)
    }

    /// The archive file.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Returns true if changes have not been written back yet.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write staged changes to disk. A clean engine does nothing.
    pub fn commit(&mut self) -> StorageResult<()> {
        if !self.dirty {
            return Ok(());
        }

        let directory = match self.file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let temp = NamedTempFile::new_in(directory)?;
        {
            let mut writer = ZipWriter::new(temp.as_file());
            for (name, entry) in &self.entries {
                let options = SimpleFileOptions::default()
                    .compression_method(CompressionMethod::Deflated)
                    .last_modified_time(to_zip_time(entry.timestamp));
                if is_marker(name) {
                    writer.add_directory(name.as_str(), options)?;
                } else {
                    writer.start_file(name.as_str(), options)?;
                    writer.write_all(&entry.data)?;
                }
            }
            writer.finish()?;
        }
        temp.persist(&self.file).map_err(|e| StorageError::Io(e.error))?;

        self.dirty = false;
        tracing::info!(
            file = %self.file.display(),
            entries = self.entries.len(),
            "archive committed"
        );
        Ok(())
    }

    fn leaf(&self, path: &str) -> Option<&Entry> {
        if path.is_empty() {
            return None;
        }
        self.entries.get(path)
    }

    fn is_directory(&self, path: &str) -> bool {
        !path.is_empty()
            && (self.entries.contains_key(&marker(path))
                || self.entries.keys().any(|key| path::is_within(key, path)))
    }
}

fn load(file: &Path) -> StorageResult<BTreeMap<String, Entry>> {
    let mut archive = ZipArchive::new(File::open(file)?)?;
    let mut entries = BTreeMap::new();
    for index in 0..archive.len() {
        let mut item = archive.by_index(index)?;
        let name = match path::normalize(item.name()) {
            Ok(name) if !name.is_empty() => name,
            _ => {
                tracing::warn!(entry = item.name(), "archive: skipping unusable entry name");
                continue;
            }
        };
        let timestamp = item.last_modified().map(from_zip_time).unwrap_or(0);
        if item.is_dir() {
            entries.insert(
                marker(&name),
                Entry {
                    data: Vec::new(),
                    timestamp,
                },
            );
        } else {
            let mut data = Vec::with_capacity(item.size() as usize);
            item.read_to_end(&mut data)?;
            entries.insert(name, Entry { data, timestamp });
        }
    }
    Ok(entries)
}

impl Engine for ArchiveEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Archive
    }

    fn read(&mut self, name: &str) -> StorageResult<Vec<u8>> {
        let path = path::normalize(name)?;
        self.leaf(&path)
            .map(|entry| entry.data.clone())
            .ok_or_else(|| StorageError::not_found(name))
    }

    fn write(&mut self, name: &str, data: &[u8]) -> StorageResult<bool> {
        let path = path::normalize(name)?;
        if path.is_empty() || path::is_protected(name) {
            return Err(StorageError::invalid_path(name));
        }
        let timestamp = now();
        for directory in path::ancestors(&path) {
            self.entries.entry(marker(directory)).or_insert(Entry {
                data: Vec::new(),
                timestamp,
            });
        }
        self.entries.insert(
            path,
            Entry {
                data: data.to_vec(),
                timestamp,
            },
        );
        self.dirty = true;
        Ok(true)
    }

    fn delete(&mut self, name: &str) -> StorageResult<bool> {
        if path::is_protected(name) {
            return Ok(false);
        }
        let path = path::normalize(name)?;

        if self.leaf(&path).is_some() {
            self.entries.remove(&path);
            self.dirty = true;
            return Ok(true);
        }
        if !self.is_directory(&path) {
            return Err(StorageError::not_found(name));
        }

        let directory_marker = marker(&path);
        let before = self.entries.len();
        self.entries
            .retain(|key, _| *key != directory_marker && !path::is_within(key, &path));
        tracing::debug!(
            directory = %path,
            removed = before - self.entries.len(),
            "archive: removed directory"
        );
        self.dirty = true;
        Ok(true)
    }

    fn exists(&mut self, name: &str) -> bool {
        match path::normalize(name) {
            Ok(path) => self.leaf(&path).is_some() || self.is_directory(&path),
            Err(_) => false,
        }
    }

    fn list(&mut self, prefix: Option<&str>) -> StorageResult<Vec<FileObject>> {
        let prefix = path::normalize(prefix.unwrap_or(""))?;
        if !prefix.is_empty() && self.leaf(&prefix).is_none() && !self.is_directory(&prefix) {
            return Err(StorageError::not_found(prefix));
        }

        Ok(self
            .entries
            .iter()
            .filter(|(key, _)| !is_marker(key))
            .filter(|(key, _)| prefix.is_empty() || path::matches_prefix(key, &prefix))
            .map(|(key, entry)| FileObject::new(key, entry.data.len() as u64, entry.timestamp))
            .collect())
    }

    fn close(&mut self) -> StorageResult<()> {
        self.commit()
    }
}

impl Drop for ArchiveEngine {
    fn drop(&mut self) {
        if !self.dirty {
            return;
        }
        tracing::warn!(file = %self.file.display(), "archive dropped with staged changes, committing");
        if let Err(e) = self.commit() {
            tracing::warn!(file = %self.file.display(), error = %e, "archive commit failed");
        }
    }
}
