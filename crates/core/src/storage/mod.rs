//! Storage Gateway: lists video assets, uploads new ones under collision-safe
//! names and issues short-lived read URLs.
//!
//! The gateway talks to the backing object store only through [`ObjectStore`],
//! so the production bucket, a local directory and the in-memory fake used by
//! tests are interchangeable.

pub mod gcs;
pub mod local;
pub mod memory;

use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    clock::{Clock, SystemClock},
    error::{Result, VqaError},
};

pub use gcs::GcsObjectStore;
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;

pub const VIDEO_EXTENSION: &str = ".mp4";
pub const VIDEO_MIME_TYPE: &str = "video/mp4";
pub const SIGNED_URL_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Bucket {namespace} does not exist")]
    NamespaceMissing { namespace: String },

    #[error("Object {name} not found in {namespace}")]
    NotFound { namespace: String, name: String },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Object storage capability consumed by the gateway.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Names of every object in the namespace, in backing-store order.
    async fn list(&self, namespace: &str) -> std::result::Result<Vec<String>, StorageError>;

    async fn get(&self, namespace: &str, name: &str) -> std::result::Result<Vec<u8>, StorageError>;

    /// Write the full object. Must never leave a partially written object visible.
    async fn put(
        &self,
        namespace: &str,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> std::result::Result<(), StorageError>;

    async fn exists(&self, namespace: &str, name: &str) -> std::result::Result<bool, StorageError>;

    /// A credential-free read URL valid for `ttl`.
    async fn signed_url(
        &self,
        namespace: &str,
        name: &str,
        ttl: Duration,
    ) -> std::result::Result<String, StorageError>;

    /// Locator the inference backend ingests, e.g. `gs://bucket/name`.
    fn object_uri(&self, namespace: &str, name: &str) -> String;
}

#[derive(Clone, Debug, Serialize)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct VideoAsset {
    pub name: String,
    pub uri: String,
    pub signed_url: SignedUrl,
}

pub fn is_video_name(name: &str) -> bool {
    name.len() > VIDEO_EXTENSION.len()
        && name.to_ascii_lowercase().ends_with(VIDEO_EXTENSION)
}

/// Original file name reduced to its final path component.
fn sanitize_original_name(original: &str) -> String {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original)
        .trim();
    if base.is_empty() {
        format!("upload{VIDEO_EXTENSION}")
    } else {
        base.to_string()
    }
}

pub struct StorageGateway {
    store: Arc<dyn ObjectStore>,
    namespace: String,
    clock: Arc<dyn Clock>,
    last_stamp: AtomicI64,
}

impl StorageGateway {
    pub fn new(store: Arc<dyn ObjectStore>, namespace: impl Into<String>) -> Self {
        Self::with_clock(store, namespace, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn ObjectStore>,
        namespace: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            clock,
            last_stamp: AtomicI64::new(i64::MIN),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn list_videos(&self) -> Result<Vec<String>> {
        let names = self
            .store
            .list(&self.namespace)
            .await
            .map_err(|e| self.map_error(e, None))?;

        let videos: Vec<String> = names.into_iter().filter(|n| is_video_name(n)).collect();
        tracing::debug!(namespace = %self.namespace, count = videos.len(), "listed videos");
        Ok(videos)
    }

    /// Store `bytes` under `"{unix_seconds}_{original}"` and return that name.
    pub async fn upload_video(&self, bytes: Vec<u8>, original_name: &str) -> Result<String> {
        let original = sanitize_original_name(original_name);
        let mut stamp = self.next_stamp();
        let mut stored_name = format!("{stamp}_{original}");

        // Another session may already hold this stamp.
        loop {
            let taken = self
                .store
                .exists(&self.namespace, &stored_name)
                .await
                .map_err(|e| upload_failed(&e))?;
            if !taken {
                break;
            }
            stamp = self.claim_after(stamp);
            stored_name = format!("{stamp}_{original}");
        }

        let size = bytes.len();
        self.store
            .put(&self.namespace, &stored_name, bytes, VIDEO_MIME_TYPE)
            .await
            .map_err(|e| upload_failed(&e))?;

        tracing::info!(namespace = %self.namespace, name = %stored_name, size, "uploaded video");
        Ok(stored_name)
    }

    pub async fn signed_read_url(&self, stored_name: &str) -> Result<SignedUrl> {
        let issued_at = self.clock.now();
        let url = self
            .store
            .signed_url(&self.namespace, stored_name, SIGNED_URL_TTL)
            .await
            .map_err(|e| self.map_error(e, Some(stored_name)))?;

        let ttl = chrono::Duration::from_std(SIGNED_URL_TTL).unwrap_or(chrono::Duration::zero());
        Ok(SignedUrl {
            url,
            expires_at: issued_at + ttl,
        })
    }

    /// Fails with `ObjectNotFound` unless `stored_name` is a stored video.
    pub async fn ensure_video(&self, stored_name: &str) -> Result<()> {
        let found = is_video_name(stored_name)
            && self
                .store
                .exists(&self.namespace, stored_name)
                .await
                .map_err(|e| self.map_error(e, Some(stored_name)))?;
        if !found {
            return Err(VqaError::ObjectNotFound {
                name: stored_name.to_string(),
            });
        }
        Ok(())
    }

    pub fn storage_uri(&self, stored_name: &str) -> String {
        self.store.object_uri(&self.namespace, stored_name)
    }

    pub async fn video_asset(&self, stored_name: &str) -> Result<VideoAsset> {
        let signed_url = self.signed_read_url(stored_name).await?;
        Ok(VideoAsset {
            name: stored_name.to_string(),
            uri: self.storage_uri(stored_name),
            signed_url,
        })
    }

    pub async fn fetch_video(&self, stored_name: &str) -> Result<Vec<u8>> {
        self.store
            .get(&self.namespace, stored_name)
            .await
            .map_err(|e| self.map_error(e, Some(stored_name)))
    }

    /// Current clock second, forced strictly above anything issued before.
    fn next_stamp(&self) -> i64 {
        let now = self.clock.now().timestamp();
        let prev = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        now.max(prev.saturating_add(1))
    }

    fn claim_after(&self, stamp: i64) -> i64 {
        let floor = stamp.saturating_add(1);
        let prev = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(floor.max(last.saturating_add(1)))
            })
            .unwrap_or(floor);
        floor.max(prev.saturating_add(1))
    }

    fn map_error(&self, err: StorageError, name: Option<&str>) -> VqaError {
        match err {
            StorageError::NamespaceMissing { namespace } => {
                VqaError::StorageUnavailable { namespace }
            }
            StorageError::NotFound { name: missing, .. } => VqaError::ObjectNotFound {
                name: name.map(str::to_string).unwrap_or(missing),
            },
            other => VqaError::Storage(other),
        }
    }
}

fn upload_failed(err: &StorageError) -> VqaError {
    VqaError::UploadFailed {
        cause: err.to_string(),
    }
}
