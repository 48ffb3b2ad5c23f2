//! Storage Writer Abstraction
//!
//! The worker talks to the blob store only through these two traits: a client
//! that opens write streams and the stream handle itself.
//!
//! Implementations:
//! - `InMemoryStorage`: For unit tests and DST
//! - `LocalFsStorage`: For development and local testing
//! - `SimulatedStorage`: Fault injection wrapper (see `simulated_store`)
//! - `CloudStorage`: GCS / S3 for production (feature-gated)

use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Smallest chunk size that still enables buffering inside the remote writer
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

pub type IoFuture<'a, T> = Pin<Box<dyn Future<Output = IoResult<T>> + Send + 'a>>;

/// An open write stream to a single remote object
///
/// Bytes become durable and visible only when `close` succeeds.
pub trait ObjectWriter: Send + 'static {
    /// Preferred internal chunk size; must be called before the first write
    fn set_chunk_size(&mut self, bytes: usize);

    /// Write a byte slice, returning how many bytes were accepted
    fn write<'a>(&'a mut self, data: &'a [u8]) -> IoFuture<'a, usize>;

    /// Flush and finalize the object.
    ///
    /// Consumes the handle: a stream can never be closed twice.
    fn close(self: Box<Self>) -> IoFuture<'static, ()>;
}

/// Client capable of opening object write streams
///
/// Shared by every worker of an output instance, so it must be safe for
/// concurrent use.
pub trait StorageClient: Send + Sync + 'static {
    /// URL scheme used when formatting object locations (e.g. `gs`)
    fn scheme(&self) -> &str;

    /// Open a write stream for `path` inside `bucket`
    fn open_writer<'a>(
        &'a self,
        bucket: &'a str,
        path: &'a str,
    ) -> IoFuture<'a, Box<dyn ObjectWriter>>;
}

/// Write the whole slice, looping over short writes
pub async fn write_all(writer: &mut dyn ObjectWriter, mut data: &[u8]) -> (usize, IoResult<()>) {
    let mut written = 0;
    while !data.is_empty() {
        match writer.write(data).await {
            Ok(0) => {
                return (
                    written,
                    Err(IoError::new(ErrorKind::WriteZero, "object writer accepted no bytes")),
                )
            }
            Ok(n) => {
                written += n;
                data = &data[n..];
            }
            Err(e) => return (written, Err(e)),
        }
    }
    (written, Ok(()))
}

// ============================================================================
// InMemoryStorage - For tests and DST
// ============================================================================

/// Counters kept by `InMemoryStorage`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryStorageStats {
    pub opened: u64,
    pub committed: u64,
    /// Writers opened but neither closed nor dropped
    pub in_flight: u64,
    /// Commits that replaced an existing object with the same name
    pub overwritten: u64,
}

/// A committed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub path: String,
    pub data: Vec<u8>,
    pub chunk_size: usize,
}

#[derive(Debug, Default)]
struct InMemoryState {
    objects: HashMap<(String, String), StoredObject>,
    /// Commit order, for tests that care about sequencing
    commit_log: Vec<(String, String)>,
    stats: InMemoryStorageStats,
}

/// In-memory storage for unit tests and deterministic simulation
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a committed object
    pub fn object(&self, bucket: &str, path: &str) -> Option<StoredObject> {
        self.state
            .read()
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    /// All committed objects in commit order (latest version of each name)
    pub fn objects(&self) -> Vec<StoredObject> {
        let state = self.state.read();
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for key in state.commit_log.iter().rev() {
            if seen.insert(key.clone()) {
                if let Some(obj) = state.objects.get(key) {
                    out.push(obj.clone());
                }
            }
        }
        out.reverse();
        out
    }

    pub fn len(&self) -> usize {
        self.state.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().objects.is_empty()
    }

    pub fn stats(&self) -> InMemoryStorageStats {
        self.state.read().stats.clone()
    }
}

impl StorageClient for InMemoryStorage {
    fn scheme(&self) -> &str {
        "mem"
    }

    fn open_writer<'a>(
        &'a self,
        bucket: &'a str,
        path: &'a str,
    ) -> IoFuture<'a, Box<dyn ObjectWriter>> {
        Box::pin(async move {
            {
                let mut state = self.state.write();
                state.stats.opened += 1;
                state.stats.in_flight += 1;
            }
            let writer = InMemoryWriter {
                state: Arc::clone(&self.state),
                bucket: bucket.to_string(),
                path: path.to_string(),
                data: Vec::new(),
                chunk_size: 0,
                closed: false,
            };
            Ok(Box::new(writer) as Box<dyn ObjectWriter>)
        })
    }
}

/// Write stream into `InMemoryStorage`; data is published on close
struct InMemoryWriter {
    state: Arc<RwLock<InMemoryState>>,
    bucket: String,
    path: String,
    data: Vec<u8>,
    chunk_size: usize,
    closed: bool,
}

impl ObjectWriter for InMemoryWriter {
    fn set_chunk_size(&mut self, bytes: usize) {
        self.chunk_size = bytes;
    }

    fn write<'a>(&'a mut self, data: &'a [u8]) -> IoFuture<'a, usize> {
        Box::pin(async move {
            self.data.extend_from_slice(data);
            Ok(data.len())
        })
    }

    fn close(mut self: Box<Self>) -> IoFuture<'static, ()> {
        Box::pin(async move {
            let key = (self.bucket.clone(), self.path.clone());
            let object = StoredObject {
                bucket: self.bucket.clone(),
                path: self.path.clone(),
                data: std::mem::take(&mut self.data),
                chunk_size: self.chunk_size,
            };
            {
                let mut state = self.state.write();
                if state.objects.insert(key.clone(), object).is_some() {
                    state.stats.overwritten += 1;
                }
                state.commit_log.push(key);
                state.stats.committed += 1;
                state.stats.in_flight = state.stats.in_flight.saturating_sub(1);
            }
            self.closed = true;
            Ok(())
        })
    }
}

impl Drop for InMemoryWriter {
    fn drop(&mut self) {
        if !self.closed {
            // Abandoned upload: nothing becomes visible
            let mut state = self.state.write();
            state.stats.in_flight = state.stats.in_flight.saturating_sub(1);
        }
    }
}

// ============================================================================
// LocalFsStorage - For development
// ============================================================================

/// Suffix of objects that are still being written
const PARTIAL_SUFFIX: &str = ".partial";

/// Local filesystem storage for development and testing
///
/// Objects are written to `<root>/<bucket>/<path>.partial` and renamed into
/// place on close, so readers never observe an uncommitted object.
#[derive(Debug, Clone)]
pub struct LocalFsStorage {
    base_path: PathBuf,
    next_id: Arc<AtomicU64>,
}

impl LocalFsStorage {
    pub fn new(base_path: PathBuf) -> Self {
        LocalFsStorage {
            base_path,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get the base path (for testing)
    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    /// Final location of an object
    pub fn object_path(&self, bucket: &str, path: &str) -> PathBuf {
        self.base_path.join(bucket).join(path)
    }
}

impl StorageClient for LocalFsStorage {
    fn scheme(&self) -> &str {
        "file"
    }

    fn open_writer<'a>(
        &'a self,
        bucket: &'a str,
        path: &'a str,
    ) -> IoFuture<'a, Box<dyn ObjectWriter>> {
        Box::pin(async move {
            let final_path = self.object_path(bucket, path);
            if let Some(parent) = final_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            // Unique staging name so two writers for the same object never share a file
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let mut staging = final_path.clone().into_os_string();
            staging.push(format!(".{}{}", id, PARTIAL_SUFFIX));
            let staging_path = PathBuf::from(staging);
            let file = tokio::fs::File::create(&staging_path).await?;

            Ok(Box::new(LocalFsWriter {
                file,
                staging_path,
                final_path,
                buffer: Vec::new(),
                chunk_size: 0,
            }) as Box<dyn ObjectWriter>)
        })
    }
}

/// Buffered write stream into a staging file
struct LocalFsWriter {
    file: tokio::fs::File,
    staging_path: PathBuf,
    final_path: PathBuf,
    buffer: Vec<u8>,
    /// Zero disables buffering
    chunk_size: usize,
}

impl LocalFsWriter {
    async fn flush_buffer(&mut self) -> IoResult<()> {
        if !self.buffer.is_empty() {
            self.file.write_all(&self.buffer).await?;
            self.buffer.clear();
        }
        Ok(())
    }
}

impl ObjectWriter for LocalFsWriter {
    fn set_chunk_size(&mut self, bytes: usize) {
        self.chunk_size = bytes;
        self.buffer.reserve(bytes);
    }

    fn write<'a>(&'a mut self, data: &'a [u8]) -> IoFuture<'a, usize> {
        Box::pin(async move {
            if self.chunk_size == 0 {
                self.file.write_all(data).await?;
                return Ok(data.len());
            }
            self.buffer.extend_from_slice(data);
            if self.buffer.len() >= self.chunk_size {
                self.flush_buffer().await?;
            }
            Ok(data.len())
        })
    }

    fn close(mut self: Box<Self>) -> IoFuture<'static, ()> {
        Box::pin(async move {
            self.flush_buffer().await?;
            self.file.flush().await?;
            self.file.sync_all().await?;
            tokio::fs::rename(&self.staging_path, &self.final_path).await
        })
    }
}
