use anyhow::{Result, anyhow};
use opendal::services::{Fs, S3};
use opendal::{ErrorKind, FuturesBytesStream, Operator, layers::RetryLayer};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Read size of a single object store request
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Where redeemed assets are read from
#[derive(Clone, Debug)]
pub enum StorageBackend {
    Local {
        root: PathBuf,
    },
    S3 {
        bucket: String,
        endpoint: Option<String>,
        region: Option<String>,
        access_key_id: String,
        secret_access_key: String,
    },
}

/// Read-only view of the asset bucket behind the distribution
#[derive(Clone)]
pub struct ObjectStore {
    operator: Operator,
    backend: StorageBackend,
}

impl ObjectStore {
    pub fn new(backend: StorageBackend) -> Result<Self> {
        let operator = match &backend {
            StorageBackend::Local { root } => build_fs_operator(root)?,
            StorageBackend::S3 {
                bucket,
                endpoint,
                region,
                access_key_id,
                secret_access_key,
            } => build_s3_operator(
                bucket,
                endpoint.as_deref(),
                region.as_deref(),
                access_key_id,
                secret_access_key,
            )?,
        };

        Ok(Self { operator, backend })
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.backend, StorageBackend::S3 { .. })
    }

    /// Size of the object at `key`, or `None` if there is no such object
    pub async fn stat(&self, key: &str) -> Result<Option<u64>> {
        match self.operator.stat(key).await {
            Ok(meta) if meta.mode().is_file() => Ok(Some(meta.content_length())),
            Ok(_) => Ok(None),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// Stream the inclusive byte range `start..=end` of `key` in `CHUNK_SIZE` pieces
    pub async fn stream_range(&self, key: &str, start: u64, end: u64) -> Result<FuturesBytesStream> {
        debug!(%key, start, end, remote = self.is_remote(), "Streaming object range");
        let stream = self
            .operator
            .reader_with(key)
            .chunk(CHUNK_SIZE)
            .await?
            .into_bytes_stream(start..=end)
            .await?;
        Ok(stream)
    }
}

/// Turn a request path into an object key. Rejects empty keys and `..` segments.
pub fn normalize_key(path: &str) -> Option<String> {
    let key = path.trim_start_matches('/');
    if key.is_empty() || key.ends_with('/') {
        return None;
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return None;
    }
    Some(key.to_string())
}

fn build_fs_operator(root: &Path) -> Result<Operator> {
    info!(root = ?root, "Building filesystem object store");

    let builder = Fs::default().root(
        root.to_str()
            .ok_or_else(|| anyhow!("Invalid root path: {:?}", root))?,
    );

    Ok(Operator::new(builder)?
        .layer(RetryLayer::new().with_max_times(3))
        .finish())
}

fn build_s3_operator(
    bucket: &str,
    endpoint: Option<&str>,
    region: Option<&str>,
    access_key_id: &str,
    secret_access_key: &str,
) -> Result<Operator> {
    info!(
        bucket = %bucket,
        endpoint = ?endpoint,
        region = ?region,
        "Building S3 object store"
    );

    let mut builder = S3::default()
        .bucket(bucket)
        .access_key_id(access_key_id)
        .secret_access_key(secret_access_key);

    if let Some(region) = region {
        builder = builder.region(region);
    }

    if let Some(endpoint) = endpoint {
        builder = builder.endpoint(endpoint);
    }

    Ok(Operator::new(builder)?
        .layer(RetryLayer::new().with_max_times(3))
        .finish())
}
