//! Object store client contract (S3-style API).

use crate::config::RemoteObjectConfig;
use crate::error::StorageResult;

use super::ClientError;

/// Listing entry for one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    /// Full object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification, seconds since the epoch.
    pub last_modified: i64,
}

/// Body and metadata returned by a GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectData {
    pub body: Vec<u8>,
    pub last_modified: i64,
}

/// Parameters for one page of a key listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsRequest {
    /// Only keys starting with this string are returned.
    pub prefix: String,
    /// Roll keys up into common prefixes at this delimiter.
    pub delimiter: Option<String>,
    /// Upper bound on entries in the page.
    pub max_keys: Option<usize>,
    /// Resume after the previous page.
    pub continuation_token: Option<String>,
}

impl ListObjectsRequest {
    /// List keys under `prefix`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    /// Cap the page size.
    pub fn max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    /// Group keys by `delimiter`.
    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    /// Continue from a previous page.
    pub fn continuation_token(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }
}

/// One page of a key listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsPage {
    /// Objects in this page.
    pub contents: Vec<ObjectSummary>,
    /// Rolled-up key prefixes, each ending in the delimiter.
    pub common_prefixes: Vec<String>,
    /// Present when more pages follow.
    pub next_continuation_token: Option<String>,
}

/// A key the backend refused to remove during a batch delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    pub key: String,
    pub message: String,
}

/// Blocking client for a flat-namespace object store.
///
/// One round trip per call. Implementations must not retry.
pub trait ObjectClient: Send + Sync {
    /// Fetch an object. `NoSuchKey` if absent.
    fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectData, ClientError>;

    /// Store an object, replacing any previous body.
    fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), ClientError>;

    /// Object metadata, `None` if absent.
    fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectSummary>, ClientError>;

    /// Remove one object. Removing an absent key is not an error.
    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ClientError>;

    /// Remove many objects in one request.
    ///
    /// Keys the backend refused are reported back; `Err` means the batch
    /// request itself failed.
    fn delete_objects(&self, bucket: &str, keys: &[String])
    -> Result<Vec<DeleteFailure>, ClientError>;

    /// One page of keys.
    fn list_objects(
        &self,
        bucket: &str,
        request: &ListObjectsRequest,
    ) -> Result<ListObjectsPage, ClientError>;

    /// Request bucket creation. The bucket may not be visible immediately.
    fn create_bucket(&self, bucket: &str) -> Result<(), ClientError>;

    /// Request bucket deletion. The bucket may linger briefly.
    fn delete_bucket(&self, bucket: &str) -> Result<(), ClientError>;

    /// Whether the bucket is currently visible.
    fn head_bucket(&self, bucket: &str) -> Result<bool, ClientError>;

    /// Names of every visible bucket.
    fn list_buckets(&self) -> Result<Vec<String>, ClientError>;
}

/// Opens an [`ObjectClient`] for a volume configuration.
pub trait ObjectConnector: Send + Sync {
    fn connect(&self, config: &RemoteObjectConfig) -> StorageResult<Box<dyn ObjectClient>>;
}

impl<F> ObjectConnector for F
where
    F: Fn(&RemoteObjectConfig) -> StorageResult<Box<dyn ObjectClient>> + Send + Sync,
{
    fn connect(&self, config: &RemoteObjectConfig) -> StorageResult<Box<dyn ObjectClient>> {
        self(config)
    }
}
