//! In-memory object store.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

use crate::client::{
    ClientError, DeleteFailure, ListObjectsPage, ListObjectsRequest, ObjectClient, ObjectData,
    ObjectSummary,
};
use crate::object::now;

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    last_modified: i64,
}

#[derive(Debug, Default)]
struct Bucket {
    objects: BTreeMap<String, StoredObject>,
    /// HEAD polls left before a freshly created bucket becomes visible.
    pending_polls: u32,
}

#[derive(Debug)]
struct StoreState {
    buckets: BTreeMap<String, Bucket>,
    /// Deleted buckets that still answer HEAD for this many polls.
    lingering: BTreeMap<String, u32>,
    page_size: usize,
    visibility_delay: u32,
    protected_keys: BTreeSet<String>,
    offline: bool,
}

/// Object store held in process memory.
///
/// Cloning shares state. Supports small page sizes and delayed bucket
/// visibility so pagination and bucket waiters can be exercised.
#[derive(Debug, Clone)]
pub struct InMemoryObjectStore {
    state: Arc<Mutex<StoreState>>,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    /// Create an empty store with no buckets.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState {
                buckets: BTreeMap::new(),
                lingering: BTreeMap::new(),
                page_size: DEFAULT_PAGE_SIZE,
                visibility_delay: 0,
                protected_keys: BTreeSet::new(),
                offline: false,
            })),
        }
    }

    /// Add a bucket that is visible immediately.
    pub fn with_bucket(self, bucket: impl Into<String>) -> Self {
        self.state
            .lock()
            .buckets
            .insert(bucket.into(), Bucket::default());
        self
    }

    /// Limit every listing page to `page_size` entries.
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.state.lock().page_size = page_size.max(1);
        self
    }

    /// Buckets created or deleted through the client only change visibility
    /// after this many `head_bucket` polls.
    pub fn with_visibility_delay(self, polls: u32) -> Self {
        self.state.lock().visibility_delay = polls;
        self
    }

    /// Make batch deletes refuse `key`.
    pub fn protect_key(&self, key: impl Into<String>) {
        self.state.lock().protected_keys.insert(key.into());
    }

    /// Simulate a dropped connection: every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// All keys stored in `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.state
            .lock()
            .buckets
            .get(bucket)
            .map(|b| b.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// A boxed client sharing this store's state.
    pub fn client(&self) -> Box<dyn ObjectClient> {
        Box::new(self.clone())
    }

    fn check_online(state: &StoreState) -> Result<(), ClientError> {
        if state.offline {
            Err(ClientError::transport("connection refused"))
        } else {
            Ok(())
        }
    }
}

fn bucket_mut<'a>(state: &'a mut StoreState, bucket: &str) -> Result<&'a mut Bucket, ClientError> {
    state
        .buckets
        .get_mut(bucket)
        .ok_or_else(|| ClientError::NoSuchBucket(bucket.to_string()))
}

impl ObjectClient for InMemoryObjectStore {
    fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectData, ClientError> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        let bucket = bucket_mut(&mut state, bucket)?;
        bucket
            .objects
            .get(key)
            .map(|o| ObjectData {
                body: o.body.clone(),
                last_modified: o.last_modified,
            })
            .ok_or_else(|| ClientError::NoSuchKey(key.to_string()))
    }

    fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        let bucket = bucket_mut(&mut state, bucket)?;
        bucket.objects.insert(
            key.to_string(),
            StoredObject {
                body: body.to_vec(),
                last_modified: now(),
            },
        );
        Ok(())
    }

    fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectSummary>, ClientError> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        let bucket = bucket_mut(&mut state, bucket)?;
        Ok(bucket.objects.get(key).map(|o| ObjectSummary {
            key: key.to_string(),
            size: o.body.len() as u64,
            last_modified: o.last_modified,
        }))
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        let bucket = bucket_mut(&mut state, bucket)?;
        bucket.objects.remove(key);
        Ok(())
    }

    fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> Result<Vec<DeleteFailure>, ClientError> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        let protected = state.protected_keys.clone();
        let bucket = bucket_mut(&mut state, bucket)?;

        let mut failures = Vec::new();
        for key in keys {
            if protected.contains(key) {
                failures.push(DeleteFailure {
                    key: key.clone(),
                    message: "access denied".to_string(),
                });
                continue;
            }
            bucket.objects.remove(key);
        }
        Ok(failures)
    }

    fn list_objects(
        &self,
        bucket: &str,
        request: &ListObjectsRequest,
    ) -> Result<ListObjectsPage, ClientError> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        let page_size = state.page_size;
        let bucket = bucket_mut(&mut state, bucket)?;

        let limit = request.max_keys.unwrap_or(page_size).min(page_size).max(1);
        let start = match request.continuation_token.as_deref() {
            Some(token) => Bound::Excluded(token),
            None => Bound::Unbounded,
        };

        let mut page = ListObjectsPage::default();
        let mut count = 0;
        let mut last_key: Option<&String> = None;
        let mut truncated = false;

        for (key, object) in bucket.objects.range::<str, _>((start, Bound::Unbounded)) {
            if !key.starts_with(request.prefix.as_str()) {
                continue;
            }
            if count == limit {
                truncated = true;
                break;
            }

            let rest = &key[request.prefix.len()..];
            let rolled_up = request
                .delimiter
                .as_deref()
                .and_then(|d| rest.find(d).map(|idx| idx + d.len()));
            match rolled_up {
                Some(end) => {
                    let common = &key[..request.prefix.len() + end];
                    if page.common_prefixes.last().map(String::as_str) != Some(common) {
                        page.common_prefixes.push(common.to_string());
                        count += 1;
                    }
                }
                None => {
                    page.contents.push(ObjectSummary {
                        key: key.clone(),
                        size: object.body.len() as u64,
                        last_modified: object.last_modified,
                    });
                    count += 1;
                }
            }
            last_key = Some(key);
        }

        if truncated {
            page.next_continuation_token = last_key.cloned();
        }
        Ok(page)
    }

    fn create_bucket(&self, bucket: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        if state.buckets.contains_key(bucket) {
            return Err(ClientError::BucketAlreadyExists(bucket.to_string()));
        }
        let pending_polls = state.visibility_delay;
        state.lingering.remove(bucket);
        state.buckets.insert(
            bucket.to_string(),
            Bucket {
                objects: BTreeMap::new(),
                pending_polls,
            },
        );
        Ok(())
    }

    fn delete_bucket(&self, bucket: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        match state.buckets.get(bucket) {
            None => return Err(ClientError::NoSuchBucket(bucket.to_string())),
            Some(b) if !b.objects.is_empty() => {
                return Err(ClientError::BucketNotEmpty(bucket.to_string()));
            }
            Some(_) => {}
        }
        state.buckets.remove(bucket);
        let delay = state.visibility_delay;
        if delay > 0 {
            state.lingering.insert(bucket.to_string(), delay);
        }
        Ok(())
    }

    fn head_bucket(&self, bucket: &str) -> Result<bool, ClientError> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;

        if let Some(polls) = state.lingering.get_mut(bucket) {
            *polls -= 1;
            if *polls == 0 {
                state.lingering.remove(bucket);
            }
            return Ok(true);
        }

        match state.buckets.get_mut(bucket) {
            Some(b) if b.pending_polls > 0 => {
                b.pending_polls -= 1;
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    fn list_buckets(&self) -> Result<Vec<String>, ClientError> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        Ok(state.buckets.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryObjectStore {
        let store = InMemoryObjectStore::new().with_bucket("data");
        for key in ["a/1.txt", "a/2.txt", "a/b/3.txt", "ab.txt", "c.txt"] {
            store.put_object("data", key, b"x").unwrap();
        }
        store
    }

    #[test]
    fn test_get_missing_key() {
        let store = store();
        assert_eq!(
            store.get_object("data", "nope").unwrap_err(),
            ClientError::NoSuchKey("nope".into())
        );
        assert!(matches!(
            store.get_object("other", "a/1.txt"),
            Err(ClientError::NoSuchBucket(_))
        ));
    }

    #[test]
    fn test_pagination() {
        let store = store().with_page_size(2);
        let mut keys = Vec::new();
        let mut token = None;
        loop {
            let request = ListObjectsRequest::with_prefix("a/").continuation_token(token);
            let page = store.list_objects("data", &request).unwrap();
            keys.extend(page.contents.into_iter().map(|o| o.key));
            token = page.next_continuation_token;
            if token.is_none() {
                break;
            }
        }
        assert_eq!(keys, vec!["a/1.txt", "a/2.txt", "a/b/3.txt"]);
    }

    #[test]
    fn test_delimiter_rolls_up_prefixes() {
        let store = store();
        let request = ListObjectsRequest::with_prefix("a/").delimiter("/");
        let page = store.list_objects("data", &request).unwrap();
        let keys: Vec<_> = page.contents.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a/1.txt", "a/2.txt"]);
        assert_eq!(page.common_prefixes, vec!["a/b/"]);
    }

    #[test]
    fn test_batch_delete_reports_refused_keys() {
        let store = store();
        store.protect_key("a/2.txt");
        let failures = store
            .delete_objects("data", &["a/1.txt".into(), "a/2.txt".into()])
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "a/2.txt");
        assert_eq!(store.keys("data"), vec!["a/2.txt", "a/b/3.txt", "ab.txt", "c.txt"]);
    }

    #[test]
    fn test_bucket_visibility_delay() {
        let store = InMemoryObjectStore::new().with_visibility_delay(2);
        store.create_bucket("late").unwrap();
        assert!(!store.head_bucket("late").unwrap());
        assert!(!store.head_bucket("late").unwrap());
        assert!(store.head_bucket("late").unwrap());

        store.delete_bucket("late").unwrap();
        assert!(store.head_bucket("late").unwrap());
        assert!(store.head_bucket("late").unwrap());
        assert!(!store.head_bucket("late").unwrap());
    }

    #[test]
    fn test_offline() {
        let store = store();
        store.set_offline(true);
        assert!(matches!(store.list_buckets(), Err(ClientError::Transport(_))));
        store.set_offline(false);
        assert_eq!(store.list_buckets().unwrap(), vec!["data"]);
    }
}
