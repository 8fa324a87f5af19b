use std::{
    collections::BTreeMap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use super::{ObjectStore, StorageError};

type Namespaces = BTreeMap<String, Vec<(String, Vec<u8>)>>;

/// In-process object store. Objects keep insertion order, like a bucket listing.
#[derive(Default)]
pub struct MemoryObjectStore {
    namespaces: Mutex<Namespaces>,
    fail_next_put: Mutex<Option<String>>,
    signatures: AtomicU64,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(namespace: &str) -> Self {
        let store = Self::new();
        store.lock().insert(namespace.to_string(), Vec::new());
        store
    }

    pub fn with_objects<I, N>(namespace: &str, objects: I) -> Self
    where
        I: IntoIterator<Item = (N, Vec<u8>)>,
        N: Into<String>,
    {
        let store = Self::with_namespace(namespace);
        {
            let mut namespaces = store.lock();
            let bucket = namespaces.entry(namespace.to_string()).or_default();
            for (name, bytes) in objects {
                bucket.push((name.into(), bytes));
            }
        }
        store
    }

    /// Make the next `put` fail with `reason` without touching the namespace.
    pub fn fail_next_put(&self, reason: &str) {
        *self
            .fail_next_put
            .lock()
            .expect("MemoryObjectStore poisoned") = Some(reason.to_string());
    }

    /// Drop a namespace and everything in it, as if the bucket were deleted.
    pub fn remove_namespace(&self, namespace: &str) {
        self.lock().remove(namespace);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Namespaces> {
        self.namespaces.lock().expect("MemoryObjectStore poisoned")
    }

    fn missing(namespace: &str) -> StorageError {
        StorageError::NamespaceMissing {
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let namespaces = self.lock();
        let bucket = namespaces
            .get(namespace)
            .ok_or_else(|| Self::missing(namespace))?;
        Ok(bucket.iter().map(|(name, _)| name.clone()).collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        let namespaces = self.lock();
        let bucket = namespaces
            .get(namespace)
            .ok_or_else(|| Self::missing(namespace))?;
        bucket
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| StorageError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn put(
        &self,
        namespace: &str,
        name: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        if let Some(reason) = self
            .fail_next_put
            .lock()
            .expect("MemoryObjectStore poisoned")
            .take()
        {
            return Err(StorageError::Backend(reason));
        }

        let mut namespaces = self.lock();
        let bucket = namespaces
            .get_mut(namespace)
            .ok_or_else(|| Self::missing(namespace))?;
        match bucket.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = bytes,
            None => bucket.push((name.to_string(), bytes)),
        }
        Ok(())
    }

    async fn exists(&self, namespace: &str, name: &str) -> Result<bool, StorageError> {
        let namespaces = self.lock();
        let bucket = namespaces
            .get(namespace)
            .ok_or_else(|| Self::missing(namespace))?;
        Ok(bucket.iter().any(|(n, _)| n == name))
    }

    async fn signed_url(
        &self,
        namespace: &str,
        name: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        if !self.exists(namespace, name).await? {
            return Err(StorageError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        let signature = self.signatures.fetch_add(1, Ordering::Relaxed);
        Ok(format!(
            "memory://{namespace}/{name}?ttl={}&sig={signature}",
            ttl.as_secs()
        ))
    }

    fn object_uri(&self, namespace: &str, name: &str) -> String {
        format!("memory://{namespace}/{name}")
    }
}
