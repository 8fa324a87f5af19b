use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::fs;

use super::{ObjectStore, StorageError};

type HmacSha256 = Hmac<Sha256>;

/// Filesystem-backed store: one directory per namespace under `root`.
///
/// Read URLs point at `base_url` and carry an expiry, a nonce and an
/// HMAC-SHA256 signature over `namespace/name`, expiry and nonce.
pub struct LocalObjectStore {
    root: PathBuf,
    base_url: String,
    signing_key: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, base_url: &str, signing_key: &str) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            signing_key: signing_key.to_string(),
        }
    }

    pub async fn create_namespace(&self, namespace: &str) -> Result<(), StorageError> {
        fs::create_dir_all(self.root.join(namespace)).await?;
        Ok(())
    }

    fn mac(
        &self,
        namespace: &str,
        name: &str,
        expires: i64,
        nonce: &str,
    ) -> Result<HmacSha256, StorageError> {
        let mut mac = HmacSha256::new_from_slice(self.signing_key.as_bytes())
            .map_err(|e| StorageError::Backend(format!("invalid signing key: {e}")))?;
        mac.update(format!("{namespace}/{name}\n{expires}\n{nonce}").as_bytes());
        Ok(mac)
    }

    fn sign(
        &self,
        namespace: &str,
        name: &str,
        expires: i64,
        nonce: &str,
    ) -> Result<String, StorageError> {
        let mac = self.mac(namespace, name, expires, nonce)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(namespace)
    }

    fn object_path(&self, namespace: &str, name: &str) -> Result<PathBuf, StorageError> {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(StorageError::Backend(format!("invalid object name: {name}")));
        }
        Ok(self.namespace_dir(namespace).join(name))
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<PathBuf, StorageError> {
        let dir = self.namespace_dir(namespace);
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(missing(namespace)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(missing(namespace)),
            Err(e) => Err(e.into()),
        }
    }
}

fn missing(namespace: &str) -> StorageError {
    StorageError::NamespaceMissing {
        namespace: namespace.to_string(),
    }
}

fn not_found(namespace: &str, name: &str) -> StorageError {
    StorageError::NotFound {
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

fn temp_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!(".{name}.{}.partial", uuid::Uuid::new_v4()))
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.ensure_namespace(namespace).await?;
        let mut entries = fs::read_dir(&dir).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }

        names.sort();
        Ok(names)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        self.ensure_namespace(namespace).await?;
        let path = self.object_path(namespace, name)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(namespace, name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        namespace: &str,
        name: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        let dir = self.ensure_namespace(namespace).await?;
        let path = self.object_path(namespace, name)?;
        let tmp = temp_path(&dir, name);

        if let Err(e) = fs::write(&tmp, &bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn exists(&self, namespace: &str, name: &str) -> Result<bool, StorageError> {
        self.ensure_namespace(namespace).await?;
        let path = self.object_path(namespace, name)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn signed_url(
        &self,
        namespace: &str,
        name: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        if !self.exists(namespace, name).await? {
            return Err(not_found(namespace, name));
        }

        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let signature = self.sign(namespace, name, expires, &nonce)?;

        Ok(format!(
            "{}/{namespace}/{name}?expires={expires}&nonce={nonce}&signature={signature}",
            self.base_url
        ))
    }

    fn object_uri(&self, namespace: &str, name: &str) -> String {
        format!("file://{}", self.namespace_dir(namespace).join(name).display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl LocalObjectStore {
        /// Check a signature issued by `signed_url` against the current time.
        fn verify(
            &self,
            namespace: &str,
            name: &str,
            expires: i64,
            nonce: &str,
            signature: &str,
        ) -> bool {
            let Ok(signature) = hex::decode(signature) else {
                return false;
            };
            expires >= Utc::now().timestamp()
                && self
                    .mac(namespace, name, expires, nonce)
                    .is_ok_and(|mac| mac.verify_slice(&signature).is_ok())
        }
    }

    fn query_param<'a>(url: &'a str, key: &str) -> &'a str {
        let query = url.split_once('?').map(|(_, q)| q).unwrap_or("");
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix(&format!("{key}=")))
            .unwrap_or("")
    }

    #[test]
    fn rejects_names_that_escape_the_namespace() {
        let store = LocalObjectStore::new("/tmp/vqa", "http://media", "k");
        assert!(store.object_path("bucket", "../etc/passwd").is_err());
        assert!(store.object_path("bucket", ".hidden.mp4").is_err());
        assert!(store.object_path("bucket", "clip.mp4").is_ok());
    }

    #[tokio::test]
    async fn signed_url_verifies_until_tampered() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "http://media/", "secret");
        store.create_namespace("bucket").await.unwrap();
        store
            .put("bucket", "clip.mp4", b"v".to_vec(), "video/mp4")
            .await
            .unwrap();

        let url = store
            .signed_url("bucket", "clip.mp4", Duration::from_secs(1800))
            .await
            .unwrap();
        assert!(url.starts_with("http://media/bucket/clip.mp4?"));

        let expires: i64 = query_param(&url, "expires").parse().unwrap();
        let nonce = query_param(&url, "nonce");
        let signature = query_param(&url, "signature");

        assert!(store.verify("bucket", "clip.mp4", expires, nonce, signature));
        assert!(!store.verify("bucket", "other.mp4", expires, nonce, signature));
        assert!(!store.verify("bucket", "clip.mp4", expires + 1, nonce, signature));
        assert!(!store.verify("bucket", "clip.mp4", expires, "other-nonce", signature));
    }

    #[test]
    fn signature_is_hmac_sha256_of_the_signed_fields() {
        let store = LocalObjectStore::new("/tmp/vqa", "http://media", "secret");
        let signature = store.sign("bucket", "clip.mp4", 1_700_001_800, "n1").unwrap();

        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(b"bucket/clip.mp4\n1700001800\nn1");
        assert_eq!(signature, hex::encode(mac.finalize().into_bytes()));
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn extending_the_nonce_does_not_carry_a_signature_over() {
        let store = LocalObjectStore::new("/tmp/vqa", "http://media", "secret");
        let expires = Utc::now().timestamp() + 600;
        let signature = store.sign("bucket", "clip.mp4", expires, "n1").unwrap();

        assert!(store.verify("bucket", "clip.mp4", expires, "n1", &signature));
        assert!(!store.verify("bucket", "clip.mp4", expires, "n1\u{80}extra", &signature));
        assert!(!store.verify("bucket", "clip.mp4", expires, "n1", "not-hex"));
    }
}
