//! Remote object store engine.
//!
//! Object stores have no directories, only keys. A directory `a` exists
//! when at least one key starts with `a/`, which one bounded listing call
//! (`max_keys = 1`) answers. Directory deletes are batch deletes of every
//! key under the prefix; refused keys are collected for the caller to
//! inspect through [`RemoteObjectEngine::errors`].

use std::thread;
use std::time::Duration;

use crate::client::{
    ClientError, DeleteFailure, ListObjectsRequest, ObjectClient, ObjectConnector, ObjectSummary,
};
use crate::config::RemoteObjectConfig;
use crate::engine::{Engine, EngineKind};
use crate::error::{StorageError, StorageResult};
use crate::object::FileObject;
use crate::path::{self, SEPARATOR};

/// Keys per batch delete request; the S3 API limit.
const DELETE_BATCH: usize = 1000;

/// Engine over one bucket of a remote object store.
pub struct RemoteObjectEngine {
    client: Box<dyn ObjectClient>,
    bucket: String,
    /// Key prefix the volume lives under, without surrounding separators.
    root: String,
    wait_attempts: u32,
    wait_interval: Duration,
    errors: Vec<DeleteFailure>,
}

impl std::fmt::Debug for RemoteObjectEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObjectEngine")
            .field("bucket", &self.bucket)
            .field("root", &self.root)
            .field("errors", &self.errors.len())
            .finish_non_exhaustive()
    }
}

impl RemoteObjectEngine {
    /// Open a client through `connector` and build the engine.
    pub fn connect(
        config: &RemoteObjectConfig,
        connector: &dyn ObjectConnector,
    ) -> StorageResult<Self> {
        config.validate()?;
        let client = connector.connect(config).map_err(|e| match e {
            StorageError::Configuration(_) => e,
            other => StorageError::configuration(format!("remote-object: {other}")),
        })?;
        Self::new(config, client)
    }

    /// Build the engine around an already connected client.
    ///
    /// The bucket is probed once: rejected credentials or an unreachable
    /// endpoint are configuration errors. A bucket that does not exist yet
    /// is fine, it can be created through [`create_bucket`](Self::create_bucket).
    pub fn new(config: &RemoteObjectConfig, client: Box<dyn ObjectClient>) -> StorageResult<Self> {
        config.validate()?;

        match client.head_bucket(&config.bucket) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(bucket = %config.bucket, "remote-object: bucket does not exist");
            }
            Err(e) => {
                return Err(StorageError::configuration(format!(
                    "remote-object: cannot reach bucket {}: {e}",
                    config.bucket
                )));
            }
        }

        let root = config
            .root
            .as_deref()
            .map(|r| r.trim_matches(SEPARATOR).to_string())
            .unwrap_or_default();

        tracing::info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = config.endpoint.as_deref().unwrap_or("default"),
            root = %root,
            "remote object engine ready"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            root,
            wait_attempts: config.wait_attempts,
            wait_interval: Duration::from_millis(config.wait_interval_ms),
            errors: Vec::new(),
        })
    }

    /// The bucket this engine reads and writes.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Batch delete failures collected so far.
    pub fn errors(&self) -> &[DeleteFailure] {
        &self.errors
    }

    /// Drain the collected batch delete failures.
    pub fn take_errors(&mut self) -> Vec<DeleteFailure> {
        std::mem::take(&mut self.errors)
    }

    /// Create a bucket and wait until it is visible.
    ///
    /// Returns false if the request fails or the bucket does not appear
    /// within the polling budget.
    pub fn create_bucket(&self, name: &str) -> bool {
        if let Err(e) = self.client.create_bucket(name) {
            tracing::warn!(bucket = name, error = %e, "remote-object: create bucket failed");
            return false;
        }
        let created = self.wait_for_bucket(name, true);
        if created {
            tracing::info!(bucket = name, "bucket created");
        }
        created
    }

    /// Delete an empty bucket and wait until it is gone.
    pub fn delete_bucket(&self, name: &str) -> bool {
        if let Err(e) = self.client.delete_bucket(name) {
            tracing::warn!(bucket = name, error = %e, "remote-object: delete bucket failed");
            return false;
        }
        let deleted = self.wait_for_bucket(name, false);
        if deleted {
            tracing::info!(bucket = name, "bucket deleted");
        }
        deleted
    }

    /// Names of every bucket; empty if the store cannot be reached.
    pub fn list_buckets(&self) -> Vec<String> {
        self.client.list_buckets().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "remote-object: list buckets failed");
            Vec::new()
        })
    }

    /// Poll until the bucket's visibility matches `present`.
    fn wait_for_bucket(&self, name: &str, present: bool) -> bool {
        for attempt in 1..=self.wait_attempts {
            match self.client.head_bucket(name) {
                Ok(visible) if visible == present => return true,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(bucket = name, attempt, error = %e, "remote-object: bucket poll failed");
                }
            }
            if attempt < self.wait_attempts {
                thread::sleep(self.wait_interval);
            }
        }
        tracing::warn!(bucket = name, present, "remote-object: gave up waiting for bucket");
        false
    }

    /// Object key for a caller name.
    fn key(&self, name: &str) -> StorageResult<String> {
        let relative = path::normalize(name)?;
        if relative.is_empty() {
            return Ok(relative);
        }
        Ok(path::join(&self.root, &relative))
    }

    /// Caller-visible path for an object key.
    fn relative<'a>(&self, key: &'a str) -> &'a str {
        path::rebase(key, &self.root)
    }

    fn head(&self, key: &str) -> Option<ObjectSummary> {
        match self.client.head_object(&self.bucket, key) {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(key, error = %e, "remote-object: head failed");
                None
            }
        }
    }

    fn is_directory(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        let request = ListObjectsRequest::with_prefix(format!("{key}{SEPARATOR}")).max_keys(1);
        match self.client.list_objects(&self.bucket, &request) {
            Ok(page) => {
                let found = !page.contents.is_empty() || !page.common_prefixes.is_empty();
                tracing::debug!(key, found, "remote-object: directory probe");
                found
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "remote-object: directory probe failed");
                false
            }
        }
    }

    /// Every key starting with `prefix`, across all pages.
    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<ObjectSummary>> {
        let mut summaries = Vec::new();
        let mut token = None;
        loop {
            let request = ListObjectsRequest::with_prefix(prefix).continuation_token(token);
            let page = self.client.list_objects(&self.bucket, &request)?;
            summaries.extend(page.contents);
            summaries.extend(page.common_prefixes.into_iter().map(|key| ObjectSummary {
                key,
                size: 0,
                last_modified: 0,
            }));
            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => return Ok(summaries),
            }
        }
    }

    fn delete_directory(&mut self, key: &str) -> StorageResult<bool> {
        let prefix = format!("{key}{SEPARATOR}");
        let keys: Vec<String> = self
            .keys_with_prefix(&prefix)?
            .into_iter()
            .map(|summary| summary.key)
            .collect();
        tracing::debug!(prefix = %prefix, keys = keys.len(), "remote-object: batch delete");

        for batch in keys.chunks(DELETE_BATCH) {
            match self.client.delete_objects(&self.bucket, batch) {
                Ok(failures) => {
                    for failure in &failures {
                        tracing::warn!(key = %failure.key, message = %failure.message, "remote-object: key not deleted");
                    }
                    self.errors.extend(failures);
                }
                Err(e) => {
                    tracing::warn!(prefix = %prefix, error = %e, "remote-object: batch delete failed");
                    self.errors.push(DeleteFailure {
                        key: prefix,
                        message: e.to_string(),
                    });
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

impl Engine for RemoteObjectEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::RemoteObject
    }

    fn read(&mut self, name: &str) -> StorageResult<Vec<u8>> {
        let key = self.key(name)?;
        if key.is_empty() {
            return Err(StorageError::not_found(name));
        }
        match self.client.get_object(&self.bucket, &key) {
            Ok(object) => Ok(object.body),
            Err(ClientError::NoSuchKey(_)) => Err(StorageError::not_found(name)),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, name: &str, data: &[u8]) -> StorageResult<bool> {
        let key = self.key(name)?;
        if key.is_empty() || path::is_protected(name) {
            return Err(StorageError::invalid_path(name));
        }
        self.client.put_object(&self.bucket, &key, data)?;
        Ok(true)
    }

    fn delete(&mut self, name: &str) -> StorageResult<bool> {
        if path::is_protected(name) {
            return Ok(false);
        }
        let key = self.key(name)?;
        if key.is_empty() {
            return Err(StorageError::not_found(name));
        }

        if self.head(&key).is_some() {
            self.client.delete_object(&self.bucket, &key)?;
            return Ok(true);
        }
        if self.is_directory(&key) {
            return self.delete_directory(&key);
        }
        Err(StorageError::not_found(name))
    }

    fn exists(&mut self, name: &str) -> bool {
        match self.key(name) {
            Ok(key) if !key.is_empty() => self.head(&key).is_some() || self.is_directory(&key),
            _ => false,
        }
    }

    fn list(&mut self, prefix: Option<&str>) -> StorageResult<Vec<FileObject>> {
        let relative = path::normalize(prefix.unwrap_or(""))?;
        let key = self.key(&relative)?;

        let query = if relative.is_empty() {
            if self.root.is_empty() {
                String::new()
            } else {
                format!("{}{SEPARATOR}", self.root)
            }
        } else {
            if self.head(&key).is_none() && !self.is_directory(&key) {
                return Err(StorageError::not_found(relative));
            }
            key
        };

        let mut files: Vec<FileObject> = self
            .keys_with_prefix(&query)?
            .into_iter()
            .filter(|summary| !path::is_protected(&summary.key))
            .filter_map(|summary| {
                let path = self.relative(&summary.key);
                (relative.is_empty() || path::matches_prefix(path, &relative))
                    .then(|| FileObject::new(path, summary.size, summary.last_modified))
            })
            .collect();
        files.sort_by(|a, b| a.path().cmp(b.path()));
        files.dedup_by(|a, b| a.path() == b.path());
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::InMemoryObjectStore;
    use crate::config::Credentials;

    fn config() -> RemoteObjectConfig {
        RemoteObjectConfig::new(Credentials::new("key", "secret"))
            .with_bucket("data")
            .with_wait(5, 0)
    }

    fn engine(store: &InMemoryObjectStore) -> RemoteObjectEngine {
        RemoteObjectEngine::new(&config(), store.client()).unwrap()
    }

    #[test]
    fn test_construction_probes_bucket() {
        let store = InMemoryObjectStore::new();
        assert!(RemoteObjectEngine::new(&config(), store.client()).is_ok());

        store.set_offline(true);
        let err = RemoteObjectEngine::new(&config(), store.client()).unwrap_err();
        assert!(err.is_configuration());

        let bad = RemoteObjectConfig::new(Credentials::new("key", ""));
        assert!(RemoteObjectEngine::new(&bad, store.client()).unwrap_err().is_configuration());
    }

    #[test]
    fn test_keys_trimmed() {
        let store = InMemoryObjectStore::new().with_bucket("data");
        let mut engine = engine(&store);
        engine.write("/docs/a.txt/", b"a").unwrap_err();
        engine.write("/docs/a.txt", b"a").unwrap();
        assert_eq!(store.keys("data"), vec!["docs/a.txt"]);
        assert_eq!(engine.read("docs/a.txt/").unwrap(), b"a");
    }

    #[test]
    fn test_root_prefix_is_rebased() {
        let store = InMemoryObjectStore::new().with_bucket("data");
        let mut engine =
            RemoteObjectEngine::new(&config().with_root("/uploads/"), store.client()).unwrap();
        engine.write("docs/a.txt", b"a").unwrap();
        store.client().put_object("data", "other/b.txt", b"b").unwrap();

        assert_eq!(store.keys("data"), vec!["other/b.txt", "uploads/docs/a.txt"]);
        let listed = engine.list(None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path(), "docs/a.txt");
        assert!(!engine.exists("other"));
    }

    #[test]
    fn test_list_paginates() {
        let store = InMemoryObjectStore::new().with_bucket("data").with_page_size(2);
        let mut engine = engine(&store);
        for i in 0..5 {
            engine.write(&format!("docs/{i}.txt"), b"x").unwrap();
        }
        engine.write("docsx.txt", b"x").unwrap();

        let listed = engine.list(Some("docs")).unwrap();
        let paths: Vec<_> = listed.iter().map(FileObject::path).collect();
        assert_eq!(
            paths,
            vec!["docs/0.txt", "docs/1.txt", "docs/2.txt", "docs/3.txt", "docs/4.txt"]
        );
    }

    #[test]
    fn test_folder_objects_not_listed() {
        let store = InMemoryObjectStore::new().with_bucket("data");
        store.client().put_object("data", "docs/", b"").unwrap();
        store.client().put_object("data", "docs/a.txt", b"a").unwrap();
        let mut engine = engine(&store);
        let listed = engine.list(None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path(), "docs/a.txt");
    }

    #[test]
    fn test_batch_delete_failures_collected() {
        let store = InMemoryObjectStore::new().with_bucket("data");
        let mut engine = engine(&store);
        engine.write("docs/a.txt", b"a").unwrap();
        engine.write("docs/b.txt", b"b").unwrap();
        store.protect_key("docs/b.txt");

        assert!(engine.delete("docs").unwrap());
        assert_eq!(engine.errors().len(), 1);
        assert_eq!(engine.errors()[0].key, "docs/b.txt");
        assert_eq!(store.keys("data"), vec!["docs/b.txt"]);

        let drained = engine.take_errors();
        assert_eq!(drained.len(), 1);
        assert!(engine.errors().is_empty());
    }

    #[test]
    fn test_probes_degrade_when_offline() {
        let store = InMemoryObjectStore::new().with_bucket("data");
        let mut engine = engine(&store);
        engine.write("a.txt", b"a").unwrap();

        store.set_offline(true);
        assert!(!engine.exists("a.txt"));
        assert!(engine.list_buckets().is_empty());
        assert_eq!(engine.read("a.txt").unwrap_err().kind(), crate::ErrorKind::Storage);
    }

    #[test]
    fn test_bucket_administration_waits() {
        let store = InMemoryObjectStore::new().with_bucket("data").with_visibility_delay(3);
        let engine = engine(&store);

        assert!(engine.create_bucket("media"));
        assert!(engine.list_buckets().contains(&"media".to_string()));
        assert!(!engine.create_bucket("media"));
        assert!(engine.delete_bucket("media"));
        assert!(!engine.list_buckets().contains(&"media".to_string()));
        assert!(!engine.delete_bucket("media"));
    }

    #[test]
    fn test_bucket_wait_gives_up() {
        let store = InMemoryObjectStore::new().with_bucket("data").with_visibility_delay(10);
        let engine = RemoteObjectEngine::new(&config().with_wait(2, 0), store.client()).unwrap();
        assert!(!engine.create_bucket("slow"));
    }
}
