use std::time::Duration;

use async_trait::async_trait;
use cloud_storage::{Client, ListRequest};
use futures::TryStreamExt;

use super::{ObjectStore, StorageError};

/// Google Cloud Storage backend.
///
/// Credentials are picked up by `cloud-storage` from `SERVICE_ACCOUNT` /
/// `GOOGLE_APPLICATION_CREDENTIALS`.
pub struct GcsObjectStore {
    client: Client,
}

impl GcsObjectStore {
    pub fn new() -> Self {
        Self {
            client: Client::default(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for GcsObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

fn is_not_found(err: &cloud_storage::Error) -> bool {
    matches!(err, cloud_storage::Error::Google(resp) if resp.error.code == 404)
}

fn backend(err: cloud_storage::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn list(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        if let Err(e) = self.client.bucket().read(namespace).await {
            return Err(if is_not_found(&e) {
                StorageError::NamespaceMissing {
                    namespace: namespace.to_string(),
                }
            } else {
                backend(e)
            });
        }

        let pages = self
            .client
            .object()
            .list(namespace, ListRequest::default())
            .await
            .map_err(backend)?
            .try_collect::<Vec<_>>()
            .await
            .map_err(backend)?;

        Ok(pages
            .into_iter()
            .flat_map(|page| page.items.into_iter().map(|object| object.name))
            .collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        self.client
            .object()
            .download(namespace, name)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    StorageError::NotFound {
                        namespace: namespace.to_string(),
                        name: name.to_string(),
                    }
                } else {
                    backend(e)
                }
            })
    }

    async fn put(
        &self,
        namespace: &str,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        // A single-request media upload is atomic: the object appears whole or not at all.
        self.client
            .object()
            .create(namespace, bytes, name, content_type)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn exists(&self, namespace: &str, name: &str) -> Result<bool, StorageError> {
        match self.client.object().read(namespace, name).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(backend(e)),
        }
    }

    async fn signed_url(
        &self,
        namespace: &str,
        name: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let object = self
            .client
            .object()
            .read(namespace, name)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    StorageError::NotFound {
                        namespace: namespace.to_string(),
                        name: name.to_string(),
                    }
                } else {
                    backend(e)
                }
            })?;

        let seconds = u32::try_from(ttl.as_secs()).unwrap_or(u32::MAX);
        object.download_url(seconds).map_err(backend)
    }

    fn object_uri(&self, namespace: &str, name: &str) -> String {
        format!("gs://{namespace}/{name}")
    }
}
