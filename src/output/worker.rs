//! Object Worker - Buffered Object Rollover
//!
//! One worker per stream tag. The worker owns at most one open remote object,
//! appends every payload it receives to it, and commits the object when either
//! trigger fires:
//!
//! - **Size**: bytes written since open (post-compression) reach the threshold.
//!   Checked after each write, so one payload can overshoot.
//! - **Idle timer**: armed when the object is opened, cancelled by any commit.
//!   Later writes do not re-arm it.
//!
//! ## Architecture
//!
//! ```text
//! put ──────┐
//! commit ───┤──► ObjectWorker task ──► open / write / close ──► StorageClient
//! status ───┤         ▲
//! shutdown ─┘         └── idle deadline (select! against the mailbox)
//! ```
//!
//! All state lives inside a single task, so the idle deadline and caller
//! messages are serialized without locks. The deadline is a plain value owned
//! by the task: clearing it on commit is the cancellation, which means a timer
//! armed for a superseded object can never fire.
//!
//! ## States
//!
//! - **Closed**: no open object, no deadline
//! - **Streaming**: one open object, deadline armed

use crate::output::clock::WallClock;
use crate::output::config::WorkerSettings;
use crate::output::object_name::ObjectNameTemplate;
use crate::output::object_store::{write_all, ObjectWriter, StorageClient};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::Error as IoError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Returned by `format_bucket_path` while no object is open
pub const CLOSED_PATH: &str = "[closed]";

/// Error type for worker operations
#[derive(Debug)]
pub enum WorkerError {
    /// Opening the remote write stream failed
    Open { path: String, source: IoError },
    /// Writing to the open stream failed after `written` bytes of this payload
    Write {
        path: String,
        written: u64,
        source: IoError,
    },
    /// Compressing the payload failed
    Compress(IoError),
    /// Closing the stream failed; the object was not committed
    Close { path: String, source: IoError },
    /// The worker task has stopped
    Unavailable,
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerError::Open { path, source } => write!(f, "open {} failed: {}", path, source),
            WorkerError::Write {
                path,
                written,
                source,
            } => write!(
                f,
                "write to {} failed after {} bytes: {}",
                path, written, source
            ),
            WorkerError::Compress(e) => write!(f, "compression failed: {}", e),
            WorkerError::Close { path, source } => {
                write!(f, "commit of {} failed: {}", path, source)
            }
            WorkerError::Unavailable => write!(f, "object worker unavailable"),
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkerError::Open { source, .. }
            | WorkerError::Write { source, .. }
            | WorkerError::Close { source, .. }
            | WorkerError::Compress(source) => Some(source),
            WorkerError::Unavailable => None,
        }
    }
}

impl WorkerError {
    /// Whether resubmitting the same payload may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, WorkerError::Unavailable)
    }
}

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Closed,
    Streaming,
}

/// Snapshot of a worker for logging and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    pub tag: String,
    pub state: WorkerState,
    /// Path of the open object, if any
    pub object_path: Option<String>,
    /// `<scheme>://<bucket>/<path>` or [`CLOSED_PATH`]
    pub bucket_path: String,
    /// Bytes written to the open object (0 when closed)
    pub bytes_written: u64,
    pub opened_at: Option<DateTime<Utc>>,
    pub objects_committed: u64,
}

/// Dependencies shared by every worker of an output
#[derive(Clone)]
pub struct WorkerResources {
    pub settings: Arc<WorkerSettings>,
    pub template: Arc<ObjectNameTemplate>,
    pub storage: Arc<dyn StorageClient>,
    pub clock: Arc<dyn WallClock>,
}

/// Messages for the worker task
enum WorkerMessage {
    /// Append a payload to the current object
    Put {
        payload: Bytes,
        ack_tx: oneshot::Sender<Result<(), WorkerError>>,
    },
    /// Commit the current object, if any
    Commit {
        ack_tx: oneshot::Sender<Result<(), WorkerError>>,
    },
    Status {
        response_tx: oneshot::Sender<WorkerStatus>,
    },
    /// Commit and stop
    Shutdown {
        response_tx: oneshot::Sender<Result<(), WorkerError>>,
    },
}

/// The object currently being streamed
struct OpenObject {
    path: String,
    opened_at: DateTime<Utc>,
    writer: Box<dyn ObjectWriter>,
    bytes_written: u64,
}

enum Event {
    Message(Option<WorkerMessage>),
    IdleTimeout,
}

/// Worker task that owns the open object and its idle deadline
pub struct ObjectWorker {
    tag: String,
    resources: WorkerResources,
    rx: mpsc::UnboundedReceiver<WorkerMessage>,
    /// Invariant: `current.is_some() == idle_deadline.is_some()` between messages
    current: Option<OpenObject>,
    idle_deadline: Option<Instant>,
    objects_committed: u64,
}

impl ObjectWorker {
    fn new(tag: String, resources: WorkerResources, rx: mpsc::UnboundedReceiver<WorkerMessage>) -> Self {
        ObjectWorker {
            tag,
            resources,
            rx,
            current: None,
            idle_deadline: None,
            objects_committed: 0,
        }
    }

    /// Run the worker loop until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        loop {
            let event = match self.idle_deadline {
                Some(deadline) => tokio::select! {
                    biased;
                    msg = self.rx.recv() => Event::Message(msg),
                    _ = tokio::time::sleep_until(deadline) => Event::IdleTimeout,
                },
                None => Event::Message(self.rx.recv().await),
            };

            match event {
                Event::IdleTimeout => self.on_idle_timeout().await,
                Event::Message(Some(msg)) => {
                    if self.handle_message(msg).await {
                        break;
                    }
                }
                Event::Message(None) => {
                    // Every handle is gone: nobody can commit this object later
                    if let Err(e) = self.commit().await {
                        error!(tag = %self.tag, error = %e, "final commit failed");
                    }
                    break;
                }
            }
        }
        debug!(tag = %self.tag, "object worker stopped");
    }

    /// Handle a single message. Returns true on shutdown.
    async fn handle_message(&mut self, msg: WorkerMessage) -> bool {
        match msg {
            WorkerMessage::Put { payload, ack_tx } => {
                let result = self.put(&payload).await;
                let _ = ack_tx.send(result);
                false
            }
            WorkerMessage::Commit { ack_tx } => {
                let result = self.commit().await;
                let _ = ack_tx.send(result);
                false
            }
            WorkerMessage::Status { response_tx } => {
                let _ = response_tx.send(self.status());
                false
            }
            WorkerMessage::Shutdown { response_tx } => {
                let result = self.commit().await;
                let _ = response_tx.send(result);
                true
            }
        }
    }

    async fn on_idle_timeout(&mut self) {
        let timeout = self.resources.settings.idle_timeout;
        debug!(
            tag = %self.tag,
            object = %self.bucket_path(),
            duration = timeout.as_secs_f64(),
            "committing after {:.1}s without a commit",
            timeout.as_secs_f64()
        );
        if let Err(e) = self.commit().await {
            error!(tag = %self.tag, error = %e, "idle commit failed");
        }
    }

    async fn put(&mut self, payload: &[u8]) -> Result<(), WorkerError> {
        let mut object = match self.current.take() {
            Some(object) => object,
            None => self.open_object().await?,
        };

        let data = match self.resources.settings.compression.compress(payload) {
            Ok(data) => data,
            Err(e) => {
                self.current = Some(object);
                return Err(WorkerError::Compress(e));
            }
        };

        let (written, result) = write_all(object.writer.as_mut(), &data).await;
        object.bytes_written += written as u64;
        if let Err(source) = result {
            // Stay Streaming; the caller retries the whole payload
            let path = object.path.clone();
            self.current = Some(object);
            return Err(WorkerError::Write {
                path,
                written: written as u64,
                source,
            });
        }

        if object.bytes_written >= self.resources.settings.size_threshold_bytes {
            return self.close_object(object).await;
        }
        self.current = Some(object);
        Ok(())
    }

    /// Render a name, open a stream for it and arm the idle deadline
    async fn open_object(&mut self) -> Result<OpenObject, WorkerError> {
        let settings = &self.resources.settings;
        let template = &self.resources.template;

        let opened_at = self.resources.clock.now();
        let ctx = template.context_for(&self.tag, opened_at);
        let path = template.render(&ctx, settings.compression);

        let mut writer = match self.resources.storage.open_writer(&settings.bucket, &path).await {
            Ok(writer) => writer,
            Err(source) => return Err(WorkerError::Open { path, source }),
        };
        writer.set_chunk_size(settings.chunk_size);

        self.idle_deadline = Some(deadline_after(settings.idle_timeout));
        debug!(tag = %self.tag, object = %path, "opened object");

        Ok(OpenObject {
            path,
            opened_at,
            writer,
            bytes_written: 0,
        })
    }

    /// Commit the current object. A no-op when closed.
    async fn commit(&mut self) -> Result<(), WorkerError> {
        match self.current.take() {
            Some(object) => self.close_object(object).await,
            None => {
                self.idle_deadline = None;
                Ok(())
            }
        }
    }

    async fn close_object(&mut self, object: OpenObject) -> Result<(), WorkerError> {
        self.idle_deadline = None;
        let location = self.location(&object.path);
        let OpenObject {
            path,
            writer,
            bytes_written,
            ..
        } = object;

        // The handle is consumed here whatever the outcome, so it is never closed twice
        match writer.close().await {
            Ok(()) => {
                self.objects_committed += 1;
                info!(
                    tag = %self.tag,
                    object = %location,
                    kib = bytes_written as f64 / 1024.0,
                    "committed"
                );
                Ok(())
            }
            Err(source) => Err(WorkerError::Close { path, source }),
        }
    }

    fn location(&self, path: &str) -> String {
        format!(
            "{}://{}/{}",
            self.resources.storage.scheme(),
            self.resources.settings.bucket,
            path
        )
    }

    fn bucket_path(&self) -> String {
        match &self.current {
            Some(object) => self.location(&object.path),
            None => CLOSED_PATH.to_string(),
        }
    }

    fn status(&self) -> WorkerStatus {
        WorkerStatus {
            tag: self.tag.clone(),
            state: if self.current.is_some() {
                WorkerState::Streaming
            } else {
                WorkerState::Closed
            },
            object_path: self.current.as_ref().map(|o| o.path.clone()),
            bucket_path: self.bucket_path(),
            bytes_written: self.current.as_ref().map_or(0, |o| o.bytes_written),
            opened_at: self.current.as_ref().map(|o| o.opened_at),
            objects_committed: self.objects_committed,
        }
    }
}

/// Deadline `timeout` from now, saturating far in the future
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

// ============================================================================
// ObjectWorkerHandle - public interface for interacting with a worker
// ============================================================================

/// Handle for sending messages to an object worker
#[derive(Clone)]
pub struct ObjectWorkerHandle {
    tag: Arc<str>,
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl ObjectWorkerHandle {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Append a payload, opening a new object first if none is open.
    ///
    /// On error nothing from this payload should be considered stored; the
    /// caller may resubmit it.
    pub async fn put(&self, payload: impl Into<Bytes>) -> Result<(), WorkerError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(WorkerMessage::Put {
                payload: payload.into(),
                ack_tx,
            })
            .map_err(|_| WorkerError::Unavailable)?;
        ack_rx.await.unwrap_or(Err(WorkerError::Unavailable))
    }

    /// Commit the open object. Committing a closed or stopped worker is a no-op.
    pub async fn commit(&self) -> Result<(), WorkerError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WorkerMessage::Commit { ack_tx }).is_err() {
            return Ok(());
        }
        ack_rx.await.unwrap_or(Ok(()))
    }

    pub async fn status(&self) -> Result<WorkerStatus, WorkerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(WorkerMessage::Status { response_tx })
            .map_err(|_| WorkerError::Unavailable)?;
        response_rx.await.map_err(|_| WorkerError::Unavailable)
    }

    /// Location of the open object, or [`CLOSED_PATH`]
    pub async fn format_bucket_path(&self) -> String {
        match self.status().await {
            Ok(status) => status.bucket_path,
            Err(_) => CLOSED_PATH.to_string(),
        }
    }

    /// Commit the open object and stop the worker task
    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        let (response_tx, response_rx) = oneshot::channel();
        if self.tx.send(WorkerMessage::Shutdown { response_tx }).is_err() {
            return Ok(());
        }
        response_rx.await.unwrap_or(Ok(()))
    }

    /// Whether the worker task is still accepting messages
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Spawn a worker for `tag` and return its handle + join handle
pub fn spawn_object_worker(
    tag: &str,
    resources: WorkerResources,
) -> (ObjectWorkerHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = ObjectWorker::new(tag.to_string(), resources, rx);
    let task = tokio::spawn(worker.run());
    let handle = ObjectWorkerHandle {
        tag: Arc::from(tag),
        tx,
    };
    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::clock::SimulatedClock;
    use crate::output::compression::Compression;
    use crate::output::object_store::InMemoryStorage;
    use crate::output::simulated_store::{SimulatedStorage, SimulatedStoreConfig};
    use chrono::TimeZone;
    use flate2::read::MultiGzDecoder;
    use std::io::Read;

    const BUCKET: &str = "bucket";

    fn settings(threshold: u64, idle: Duration, compression: Compression) -> WorkerSettings {
        WorkerSettings {
            size_threshold_bytes: threshold,
            idle_timeout: idle,
            compression,
            ..WorkerSettings::new(BUCKET)
        }
    }

    fn resources(
        settings: WorkerSettings,
        template: &str,
        storage: Arc<dyn StorageClient>,
    ) -> WorkerResources {
        let opened = Utc.with_ymd_and_hms(2024, 3, 9, 17, 4, 5).unwrap();
        WorkerResources {
            settings: Arc::new(settings),
            template: Arc::new(ObjectNameTemplate::compile(template).unwrap()),
            storage,
            clock: Arc::new(SimulatedClock::at(opened)),
        }
    }

    fn spawn_in_memory(
        settings: WorkerSettings,
    ) -> (ObjectWorkerHandle, tokio::task::JoinHandle<()>, InMemoryStorage) {
        let storage = InMemoryStorage::new();
        let res = resources(settings, "{{tag}}/{{uuid}}", Arc::new(storage.clone()));
        let (handle, task) = spawn_object_worker("cpu", res);
        (handle, task, storage)
    }

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        MultiGzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    #[tokio::test]
    async fn test_first_put_opens_and_second_reuses() {
        let (handle, _task, storage) =
            spawn_in_memory(settings(1024, Duration::from_secs(300), Compression::None));

        assert_eq!(handle.format_bucket_path().await, CLOSED_PATH);

        handle.put(&b"one\n"[..]).await.unwrap();
        let first = handle.status().await.unwrap();
        assert_eq!(first.state, WorkerState::Streaming);
        assert_eq!(first.bytes_written, 4);

        handle.put(&b"two\n"[..]).await.unwrap();
        let second = handle.status().await.unwrap();
        assert_eq!(second.object_path, first.object_path);
        assert_eq!(second.bytes_written, 8);
        assert_eq!(storage.stats().opened, 1);
        assert!(storage.is_empty(), "nothing committed below the threshold");

        let path = first.object_path.unwrap();
        assert_eq!(first.bucket_path, format!("mem://{}/{}", BUCKET, path));
        assert!(path.starts_with("cpu/"));
    }

    #[tokio::test]
    async fn test_size_threshold_overshoot_commits_once() {
        let (handle, _task, storage) =
            spawn_in_memory(settings(2, Duration::from_secs(300), Compression::None));

        handle.put(&b"abc"[..]).await.unwrap();

        let status = handle.status().await.unwrap();
        assert_eq!(status.state, WorkerState::Closed);
        assert_eq!(status.bucket_path, CLOSED_PATH);
        assert_eq!(status.objects_committed, 1);
        assert_eq!(storage.stats().committed, 1);
        assert_eq!(storage.objects()[0].data, b"abc");
    }

    #[tokio::test]
    async fn test_chunk_size_requested() {
        let (handle, _task, storage) =
            spawn_in_memory(settings(1, Duration::from_secs(300), Compression::None));

        handle.put(&b"x"[..]).await.unwrap();
        assert_eq!(storage.objects()[0].chunk_size, 256 * 1024);
    }

    #[tokio::test]
    async fn test_idle_timeout_commits_without_caller() {
        let (handle, _task, storage) =
            spawn_in_memory(settings(1024, Duration::from_millis(5), Compression::None));

        handle.put(&b"idle"[..]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = handle.status().await.unwrap();
        assert_eq!(status.state, WorkerState::Closed);
        assert_eq!(storage.stats().committed, 1);
        assert_eq!(storage.objects()[0].data, b"idle");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_measured_from_open_not_last_write() {
        let (handle, _task, storage) =
            spawn_in_memory(settings(1 << 20, Duration::from_secs(10), Compression::None));

        handle.put(&b"a"[..]).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        handle.put(&b"b"[..]).await.unwrap();
        assert_eq!(storage.stats().committed, 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.status().await.unwrap().state, WorkerState::Closed);
        assert_eq!(storage.objects()[0].data, b"ab");
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_cancels_timer_for_superseded_object() {
        let (handle, _task, storage) =
            spawn_in_memory(settings(1 << 20, Duration::from_secs(10), Compression::None));

        handle.put(&b"first"[..]).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.commit().await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.put(&b"second"[..]).await.unwrap();

        // The first object's deadline (t=10s) has passed; the second runs to t=16s
        tokio::time::sleep(Duration::from_secs(5)).await;
        let status = handle.status().await.unwrap();
        assert_eq!(status.state, WorkerState::Streaming);
        assert_eq!(storage.stats().committed, 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(handle.status().await.unwrap().state, WorkerState::Closed);
        assert_eq!(storage.stats().committed, 2);
    }

    #[tokio::test]
    async fn test_commit_on_closed_is_noop() {
        let (handle, _task, storage) =
            spawn_in_memory(settings(1024, Duration::from_secs(300), Compression::None));

        handle.commit().await.unwrap();
        handle.put(&b"data"[..]).await.unwrap();
        handle.commit().await.unwrap();
        handle.commit().await.unwrap();

        assert_eq!(storage.stats().committed, 1);
        assert_eq!(handle.status().await.unwrap().objects_committed, 1);
    }

    #[tokio::test]
    async fn test_concurrent_commits_close_once() {
        let (handle, _task, storage) =
            spawn_in_memory(settings(1024, Duration::from_secs(300), Compression::None));
        handle.put(&b"data"[..]).await.unwrap();

        let a = handle.clone();
        let b = handle.clone();
        let (ra, rb) = tokio::join!(a.commit(), b.commit());
        ra.unwrap();
        rb.unwrap();

        assert_eq!(storage.stats().committed, 1);
    }

    #[tokio::test]
    async fn test_gzip_round_trip() {
        let (handle, _task, storage) =
            spawn_in_memory(settings(1 << 20, Duration::from_secs(300), Compression::Gzip));

        handle.put(&b"a"[..]).await.unwrap();
        handle.put(&b"b"[..]).await.unwrap();
        handle.put(&b"z"[..]).await.unwrap();
        let written = handle.status().await.unwrap().bytes_written;
        handle.commit().await.unwrap();

        let object = &storage.objects()[0];
        assert!(object.path.ends_with(".gz"));
        assert_eq!(object.data.len() as u64, written, "size counts compressed bytes");
        assert_eq!(gunzip(&object.data), b"abz");
    }

    #[tokio::test]
    async fn test_empty_payload_opens_and_writes_nothing() {
        let (handle, _task, storage) =
            spawn_in_memory(settings(1024, Duration::from_secs(300), Compression::None));

        handle.put(Bytes::new()).await.unwrap();
        let status = handle.status().await.unwrap();
        assert_eq!(status.state, WorkerState::Streaming);
        assert_eq!(status.bytes_written, 0);

        handle.put(Bytes::new()).await.unwrap();
        assert_eq!(storage.stats().opened, 1);
    }

    #[tokio::test]
    async fn test_open_failure_leaves_worker_closed() {
        let config = SimulatedStoreConfig {
            open_fail_prob: 1.0,
            ..SimulatedStoreConfig::no_faults()
        };
        let storage = SimulatedStorage::new(InMemoryStorage::new(), 3, config);
        let res = resources(
            settings(1024, Duration::from_secs(300), Compression::None),
            "{{tag}}",
            Arc::new(storage),
        );
        let (handle, _task) = spawn_object_worker("cpu", res);

        let err = handle.put(&b"data"[..]).await.unwrap_err();
        assert!(matches!(err, WorkerError::Open { ref path, .. } if path == "cpu"));
        assert!(err.is_retryable());
        assert_eq!(handle.status().await.unwrap().state, WorkerState::Closed);
    }

    #[tokio::test]
    async fn test_write_failure_keeps_streaming_and_count() {
        let config = SimulatedStoreConfig {
            write_fail_prob: 1.0,
            ..SimulatedStoreConfig::no_faults()
        };
        let storage = SimulatedStorage::new(InMemoryStorage::new(), 3, config);
        let inner = storage.inner().clone();
        let res = resources(
            settings(1024, Duration::from_secs(300), Compression::None),
            "{{tag}}",
            Arc::new(storage),
        );
        let (handle, _task) = spawn_object_worker("cpu", res);

        let err = handle.put(&b"data"[..]).await.unwrap_err();
        assert!(matches!(err, WorkerError::Write { written: 0, .. }));

        let status = handle.status().await.unwrap();
        assert_eq!(status.state, WorkerState::Streaming);
        assert_eq!(status.bytes_written, 0);

        handle.shutdown().await.unwrap();
        assert_eq!(inner.object(BUCKET, "cpu").unwrap().data, b"");
    }

    #[tokio::test]
    async fn test_close_failure_surfaces_and_closes() {
        let config = SimulatedStoreConfig {
            close_fail_prob: 1.0,
            ..SimulatedStoreConfig::no_faults()
        };
        let storage = SimulatedStorage::new(InMemoryStorage::new(), 3, config);
        let inner = storage.inner().clone();
        let res = resources(
            settings(2, Duration::from_secs(300), Compression::None),
            "{{tag}}",
            Arc::new(storage),
        );
        let (handle, _task) = spawn_object_worker("cpu", res);

        let err = handle.put(&b"abc"[..]).await.unwrap_err();
        assert!(matches!(err, WorkerError::Close { .. }));

        // The failed handle is gone; committing again does not retry the close
        assert_eq!(handle.status().await.unwrap().state, WorkerState::Closed);
        handle.commit().await.unwrap();
        assert!(inner.is_empty());
        assert_eq!(inner.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_shutdown_commits_and_stops() {
        let (handle, task, storage) =
            spawn_in_memory(settings(1024, Duration::from_secs(300), Compression::None));

        handle.put(&b"pending"[..]).await.unwrap();
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert_eq!(storage.objects()[0].data, b"pending");
        assert!(!handle.is_running());
        assert!(matches!(
            handle.put(&b"late"[..]).await,
            Err(WorkerError::Unavailable)
        ));
        handle.commit().await.unwrap();
        handle.shutdown().await.unwrap();
        assert_eq!(handle.format_bucket_path().await, CLOSED_PATH);
    }

    #[tokio::test]
    async fn test_dropping_handles_commits() {
        let (handle, task, storage) =
            spawn_in_memory(settings(1024, Duration::from_secs(300), Compression::None));

        handle.put(&b"orphan"[..]).await.unwrap();
        drop(handle);
        task.await.unwrap();

        assert_eq!(storage.objects()[0].data, b"orphan");
    }
}
