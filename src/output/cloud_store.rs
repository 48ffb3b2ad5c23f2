//! Cloud Storage Backends
//!
//! Google Cloud Storage and S3 writers for production use, built on the
//! `object_store` crate from the Arrow ecosystem.
//!
//! Credentials come from the environment the way the provider SDKs expect
//! them (`GOOGLE_SERVICE_ACCOUNT`, `AWS_ACCESS_KEY_ID`, ...). One backend is
//! built per bucket on first use and cached; the cache is shared by every
//! worker of an output.

use crate::output::object_store::{IoFuture, ObjectWriter, StorageClient, DEFAULT_CHUNK_SIZE};
use object_store::aws::AmazonS3Builder;
use object_store::buffered::BufWriter;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Multipart uploads reject parts smaller than this (except the last)
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Which cloud provider the backend talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudProvider {
    Gcs,
    S3,
}

impl CloudProvider {
    pub fn scheme(&self) -> &'static str {
        match self {
            CloudProvider::Gcs => "gs",
            CloudProvider::S3 => "s3",
        }
    }
}

/// Storage client for GCS or S3 buckets
pub struct CloudStorage {
    provider: CloudProvider,
    region: Option<String>,
    endpoint: Option<String>,
    backends: RwLock<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl CloudStorage {
    pub fn gcs() -> Self {
        Self::new(CloudProvider::Gcs, None, None)
    }

    /// S3 with an optional region and custom endpoint (MinIO, LocalStack)
    pub fn s3(region: Option<String>, endpoint: Option<String>) -> Self {
        Self::new(CloudProvider::S3, region, endpoint)
    }

    fn new(provider: CloudProvider, region: Option<String>, endpoint: Option<String>) -> Self {
        CloudStorage {
            provider,
            region,
            endpoint,
            backends: RwLock::new(HashMap::new()),
        }
    }

    /// Use a pre-built store for `bucket` (for testing)
    pub fn with_backend(self, bucket: &str, store: Arc<dyn ObjectStore>) -> Self {
        self.backends.write().insert(bucket.to_string(), store);
        self
    }

    fn backend(&self, bucket: &str) -> IoResult<Arc<dyn ObjectStore>> {
        if let Some(store) = self.backends.read().get(bucket) {
            return Ok(Arc::clone(store));
        }

        let store = self.build_backend(bucket)?;
        let mut backends = self.backends.write();
        // Another worker may have raced us here; keep the first one
        let store = backends.entry(bucket.to_string()).or_insert(store);
        Ok(Arc::clone(store))
    }

    fn build_backend(&self, bucket: &str) -> IoResult<Arc<dyn ObjectStore>> {
        match self.provider {
            CloudProvider::Gcs => {
                let store = GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(bucket)
                    .build()
                    .map_err(|e| build_error("GCS", e))?;
                Ok(Arc::new(store))
            }
            CloudProvider::S3 => {
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
                if let Some(region) = &self.region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = &self.endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_allow_http(endpoint.starts_with("http://"));
                }
                let store = builder.build().map_err(|e| build_error("S3", e))?;
                Ok(Arc::new(store))
            }
        }
    }
}

impl std::fmt::Debug for CloudStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudStorage")
            .field("provider", &self.provider)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

fn build_error(provider: &str, err: object_store::Error) -> IoError {
    IoError::new(
        ErrorKind::InvalidInput,
        format!("Failed to create {} store: {}", provider, err),
    )
}

impl StorageClient for CloudStorage {
    fn scheme(&self) -> &str {
        self.provider.scheme()
    }

    fn open_writer<'a>(
        &'a self,
        bucket: &'a str,
        path: &'a str,
    ) -> IoFuture<'a, Box<dyn ObjectWriter>> {
        Box::pin(async move {
            let store = self.backend(bucket)?;
            Ok(Box::new(CloudWriter {
                store,
                path: ObjectPath::from(path),
                chunk_size: DEFAULT_CHUNK_SIZE,
                inner: None,
            }) as Box<dyn ObjectWriter>)
        })
    }
}

/// Upload stream for one object
///
/// The underlying `BufWriter` is created on first use so that the chunk size
/// requested after open is honoured. Nothing is visible until `close`.
struct CloudWriter {
    store: Arc<dyn ObjectStore>,
    path: ObjectPath,
    chunk_size: usize,
    inner: Option<BufWriter>,
}

impl CloudWriter {
    fn writer(&mut self) -> &mut BufWriter {
        let store = &self.store;
        let path = &self.path;
        let capacity = self.chunk_size.max(MIN_PART_SIZE);
        self.inner
            .get_or_insert_with(|| BufWriter::with_capacity(Arc::clone(store), path.clone(), capacity))
    }
}

impl ObjectWriter for CloudWriter {
    fn set_chunk_size(&mut self, bytes: usize) {
        self.chunk_size = bytes;
    }

    fn write<'a>(&'a mut self, data: &'a [u8]) -> IoFuture<'a, usize> {
        Box::pin(async move { self.writer().write(data).await })
    }

    fn close(mut self: Box<Self>) -> IoFuture<'static, ()> {
        Box::pin(async move {
            // An object with no writes is still created, empty
            self.writer().shutdown().await
        })
    }
}
