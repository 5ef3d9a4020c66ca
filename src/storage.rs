use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaStoreError {
    #[error("duplicate")]
    Duplicate,
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
}

/// Content-addressed media storage. `save` returns the public URL the stored
/// object is reachable at.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn save(&self, hash: &str, mime: &str, bytes: &[u8]) -> Result<String, MediaStoreError>;
    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), MediaStoreError>;
    async fn delete(&self, hash: &str) -> Result<(), MediaStoreError>;
    /// Public URL for an already-stored object.
    fn public_url(&self, hash: &str) -> String;
}

// ---------------- S3 Implementation (MinIO compatible) ----------------
pub struct S3MediaStore {
    bucket: String,
    client: aws_sdk_s3::Client,
    prefix: String,
    public_base: String,
}

impl S3MediaStore {
    pub async fn new() -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let bucket = std::env::var("S3_BUCKET").unwrap_or_else(|_| "folio-media".into());
        let endpoint = std::env::var("S3_ENDPOINT")
            .map_err(|_| anyhow::anyhow!("S3_ENDPOINT must be set (MinIO / S3 endpoint)"))?;
        let region = std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".into());
        let access = std::env::var("S3_ACCESS_KEY").unwrap_or_default();
        let secret = std::env::var("S3_SECRET_KEY").unwrap_or_default();
        // Base for URLs handed back to clients; defaults to path-style
        // addressing against the endpoint itself.
        let public_base = std::env::var("S3_PUBLIC_URL")
            .unwrap_or_else(|_| format!("{}/{}", endpoint.trim_end_matches('/'), bucket));

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region));
        loader = loader.endpoint_url(endpoint);
        if !access.is_empty() && !secret.is_empty() {
            let creds = Credentials::new(access, secret, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        let conf = loader.load().await;
        // Path-style addressing is required for most MinIO/local endpoints
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf).force_path_style(true).build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!("initialized S3/MinIO media client (path-style addressing)");

        // Ensure bucket exists (create if missing)
        if let Err(e) = client.head_bucket().bucket(&bucket).send().await {
            warn!("head_bucket failed for '{bucket}' (will attempt create): {e:?}");
            let mut attempt = 0u32;
            let max_attempts = 8;
            loop {
                attempt += 1;
                match client.create_bucket().bucket(&bucket).send().await {
                    Ok(_) => {
                        info!("created bucket '{bucket}' (attempt {attempt})");
                        break;
                    }
                    Err(e2) => {
                        if attempt >= max_attempts {
                            error!("create_bucket failed for '{bucket}' after {attempt} attempts: {e2:?}");
                            return Err(anyhow::anyhow!("failed to ensure bucket '{bucket}': {e2}"));
                        }
                        let backoff_ms = 200 * attempt.pow(2);
                        warn!("create_bucket attempt {attempt} failed for '{bucket}': {e2:?} (retrying in {backoff_ms}ms)");
                        tokio::time::sleep(std::time::Duration::from_millis(backoff_ms as u64))
                            .await;
                    }
                }
            }
        }

        Ok(Self { bucket, client, prefix: "media".into(), public_base })
    }

    fn key_for(&self, hash: &str) -> String {
        format!("{}/{}/{}", self.prefix, &hash[0..2], hash)
    }
}

#[async_trait]
impl MediaStore for S3MediaStore {
    async fn save(&self, hash: &str, mime: &str, bytes: &[u8]) -> Result<String, MediaStoreError> {
        use aws_sdk_s3::primitives::ByteStream;
        let key = self.key_for(hash);
        // HEAD to detect a duplicate upload (idempotent semantics)
        if self.client.head_object().bucket(&self.bucket).key(&key).send().await.is_ok() {
            return Err(MediaStoreError::Duplicate);
        }
        let put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(mime);
        if let Err(e) = put.send().await {
            error!("put_object failed hash={hash} key={key} bucket={} err={:?}", self.bucket, e);
            let hint = if e.to_string().contains("NoSuchBucket") {
                " (bucket missing or not yet propagated)"
            } else if e.to_string().contains("AccessDenied") {
                " (check S3_ACCESS_KEY/S3_SECRET_KEY permissions)"
            } else {
                ""
            };
            return Err(MediaStoreError::Other(format!("{e}{hint}")));
        }
        Ok(self.public_url(hash))
    }

    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), MediaStoreError> {
        let key = self.key_for(hash);
        let obj = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|_| MediaStoreError::NotFound)?;
        let data = obj.body.collect().await.map_err(|e| MediaStoreError::Other(e.to_string()))?;
        let bytes = Vec::from(data.into_bytes().as_ref());
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        Ok((bytes, mime))
    }

    async fn delete(&self, hash: &str) -> Result<(), MediaStoreError> {
        let key = self.key_for(hash);
        // Best-effort delete: treat not found as success
        let _ = self.client.delete_object().bucket(&self.bucket).key(&key).send().await;
        Ok(())
    }

    fn public_url(&self, hash: &str) -> String {
        format!("{}/{}", self.public_base, self.key_for(hash))
    }
}

// ---------------- Filesystem implementation (default / tests) ----------------
pub struct FsMediaStore {
    dir: std::path::PathBuf,
    public_base: String,
}

impl FsMediaStore {
    pub fn new() -> Self {
        let base = std::env::var("FOLIO_DATA_DIR").unwrap_or_else(|_| "data".into());
        let public_base =
            std::env::var("MEDIA_PUBLIC_URL").unwrap_or_else(|_| "/media".to_string());
        Self { dir: std::path::PathBuf::from(base).join("media"), public_base }
    }

    fn path_for(&self, hash: &str) -> std::path::PathBuf {
        self.dir.join(hash)
    }
}

impl Default for FsMediaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn save(&self, hash: &str, _mime: &str, bytes: &[u8]) -> Result<String, MediaStoreError> {
        let path = self.path_for(hash);
        if path.exists() {
            return Err(MediaStoreError::Duplicate);
        }
        std::fs::create_dir_all(&self.dir).map_err(|e| MediaStoreError::Other(e.to_string()))?;
        std::fs::write(&path, bytes).map_err(|e| MediaStoreError::Other(e.to_string()))?;
        Ok(self.public_url(hash))
    }

    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), MediaStoreError> {
        let bytes = std::fs::read(self.path_for(hash)).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MediaStoreError::NotFound,
            _ => MediaStoreError::Other(e.to_string()),
        })?;
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        Ok((bytes, mime))
    }

    async fn delete(&self, hash: &str) -> Result<(), MediaStoreError> {
        let _ = std::fs::remove_file(self.path_for(hash));
        Ok(())
    }

    fn public_url(&self, hash: &str) -> String {
        format!("{}/{}", self.public_base, hash)
    }
}

/// S3 when an endpoint is configured, local filesystem otherwise.
pub async fn build_media_store() -> Arc<dyn MediaStore> {
    if std::env::var("S3_ENDPOINT").is_ok() {
        match S3MediaStore::new().await {
            Ok(store) => return Arc::new(store),
            Err(e) => panic!("Failed to initialize S3 media store: {e}"),
        }
    }
    info!("S3_ENDPOINT not set; using filesystem media store");
    Arc::new(FsMediaStore::new())
}
