//! services/api/src/adapters/storage.rs
//!
//! Blob storage on the local filesystem. Presigned URLs point back at this
//! service (`/files/{key}`) and carry an HMAC-SHA256 signature over the
//! method, key, expiry and content type, so the file routes can accept a
//! direct upload without a session.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::{StreamExt, TryStreamExt};
use hmac::{Hmac, Mac};
use ride_platform_core::ports::{
    ByteStream, ObjectInfo, PortError, PortResult, PresignedUrl, Storage, StoredObject,
};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// The query parameters a presigned URL carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlSignature {
    pub expires: i64,
    pub signature: String,
}

pub struct LocalStorage {
    root: PathBuf,
    public_url: String,
    mac: HmacSha256,
}

impl LocalStorage {
    pub fn new(
        root: impl Into<PathBuf>,
        public_url: impl Into<String>,
        signing_key: impl AsRef<[u8]>,
    ) -> PortResult<Self> {
        let mac = HmacSha256::new_from_slice(signing_key.as_ref())
            .map_err(|e| PortError::Unexpected(format!("invalid signing key: {}", e)))?;
        Ok(Self {
            root: root.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
            mac,
        })
    }

    /// Resolves a key under the root, refusing anything that could escape it.
    fn path_for(&self, key: &str) -> PortResult<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(PortError::Unexpected(format!("invalid storage key '{}'", key)));
        }
        Ok(self.root.join(relative))
    }

    fn payload(method: &str, key: &str, expires: i64, content_type: &str) -> String {
        format!("{}\n{}\n{}\n{}", method, key, expires, content_type)
    }

    pub fn sign(&self, method: &str, key: &str, expires: i64, content_type: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(Self::payload(method, key, expires, content_type).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Checks a presigned request. `content_type` is empty for downloads.
    pub fn verify(
        &self,
        method: &str,
        key: &str,
        content_type: &str,
        sig: &UrlSignature,
        now: DateTime<Utc>,
    ) -> bool {
        if now.timestamp() > sig.expires {
            debug!(key, "Presigned URL expired");
            return false;
        }
        let Ok(provided) = hex::decode(&sig.signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(Self::payload(method, key, sig.expires, content_type).as_bytes());
        mac.verify_slice(&provided).is_ok()
    }

    fn presign(&self, method: &str, key: &str, content_type: &str, expiry: Duration) -> PresignedUrl {
        let expires_at = Utc::now() + expiry;
        let expires = expires_at.timestamp();
        let signature = self.sign(method, key, expires, content_type);
        let mut headers = HashMap::new();
        if !content_type.is_empty() {
            headers.insert("Content-Type".to_string(), content_type.to_string());
        }
        PresignedUrl {
            url: format!(
                "{}?expires={}&signature={}",
                self.get_url(key),
                expires,
                signature
            ),
            method: method.to_string(),
            headers,
            expires_at: Utc.timestamp_opt(expires, 0).single().unwrap_or(expires_at),
        }
    }
}

fn io_err(context: &str, e: std::io::Error) -> PortError {
    match e.kind() {
        std::io::ErrorKind::NotFound => PortError::NotFound(context.to_string()),
        _ => PortError::Unavailable(format!("{}: {}", context, e)),
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload(
        &self,
        key: &str,
        mut body: ByteStream,
        size: i64,
        _content_type: &str,
    ) -> PortResult<StoredObject> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err("create storage directory", e))?;
        }

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| io_err("create object", e))?;
        let mut written: i64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            written += chunk.len() as i64;
            file.write_all(&chunk)
                .await
                .map_err(|e| io_err("write object", e))?;
        }
        file.flush().await.map_err(|e| io_err("flush object", e))?;

        if written != size {
            warn!(key, expected = size, written, "Stored object size differs from declared size");
        }
        Ok(StoredObject {
            url: self.get_url(key),
            key: key.to_string(),
        })
    }

    async fn download(&self, key: &str) -> PortResult<ByteStream> {
        let path = self.path_for(key)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| io_err(key, e))?;
        let stream = ReaderStream::new(file).map_err(|e| io_err("read object", e));
        Ok(Box::pin(stream))
    }

    async fn delete(&self, key: &str) -> PortResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err("delete object", e)),
        }
    }

    async fn stat(&self, key: &str) -> PortResult<Option<ObjectInfo>> {
        let path = self.path_for(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(ObjectInfo {
                size: i64::try_from(meta.len()).unwrap_or(i64::MAX),
                content_type: None,
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err("stat object", e)),
        }
    }

    fn get_url(&self, key: &str) -> String {
        format!("{}/files/{}", self.public_url, key)
    }

    async fn presigned_upload_url(
        &self,
        key: &str,
        content_type: &str,
        expiry: Duration,
    ) -> PortResult<PresignedUrl> {
        self.path_for(key)?;
        Ok(self.presign("PUT", key, content_type, expiry))
    }

    async fn presigned_download_url(&self, key: &str, expiry: Duration) -> PortResult<PresignedUrl> {
        self.path_for(key)?;
        Ok(self.presign("GET", key, "", expiry))
    }

    async fn copy(&self, src: &str, dst: &str) -> PortResult<()> {
        let from = self.path_for(src)?;
        let to = self.path_for(dst)?;
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err("create storage directory", e))?;
        }
        tokio::fs::copy(&from, &to)
            .await
            .map_err(|e| io_err(src, e))?;
        Ok(())
    }
}
