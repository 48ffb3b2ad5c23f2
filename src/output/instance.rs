//! Output Instances
//!
//! An `OutputInstance` is one configured output: a bucket, a naming template,
//! thresholds and a storage client, plus one object worker per stream tag.
//! The host hands it batches through `flush` and gets back `Ok` or `Retry`.
//!
//! Several outputs can run side by side; `OutputRegistry` keys them by
//! output id and shuts them all down on exit.

use crate::output::clock::{SystemClock, WallClock};
use crate::output::config::{ConfigError, OutputConfig, StoreConfig, StoreKind};
use crate::output::object_store::{InMemoryStorage, LocalFsStorage, StorageClient};
use crate::output::record::{encode_batch, LogRecord};
use crate::output::worker::{spawn_object_worker, ObjectWorkerHandle, WorkerResources};
use bytes::Bytes;
use futures::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[cfg(feature = "cloud")]
use crate::output::cloud_store::CloudStorage;

const DEFAULT_LOCAL_PATH: &str = "./data";

/// Outcome reported back to the host for one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// The batch is in the current object
    Ok,
    /// The batch was not stored; the host should resend it
    Retry,
}

/// Build the storage client described by `config`
pub fn create_storage(config: &StoreConfig) -> Result<Arc<dyn StorageClient>, ConfigError> {
    match config.kind {
        StoreKind::Memory => Ok(Arc::new(InMemoryStorage::new())),
        StoreKind::Local => {
            let root = config
                .local_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_PATH));
            Ok(Arc::new(LocalFsStorage::new(root)))
        }
        #[cfg(feature = "cloud")]
        StoreKind::Gcs => Ok(Arc::new(CloudStorage::gcs())),
        #[cfg(feature = "cloud")]
        StoreKind::S3 => Ok(Arc::new(CloudStorage::s3(
            config.region.clone(),
            config.endpoint.clone(),
        ))),
        #[cfg(not(feature = "cloud"))]
        StoreKind::Gcs | StoreKind::S3 => Err(ConfigError::UnsupportedStore(format!(
            "{:?} support not compiled. Rebuild with --features cloud",
            config.kind
        ))),
    }
}

struct WorkerEntry {
    handle: ObjectWorkerHandle,
    task: JoinHandle<()>,
}

/// One configured output and its per-tag workers
pub struct OutputInstance {
    config: OutputConfig,
    resources: WorkerResources,
    workers: HashMap<String, WorkerEntry>,
}

impl OutputInstance {
    /// Validate `config` and build an instance writing through `storage`
    pub fn new(config: OutputConfig, storage: Arc<dyn StorageClient>) -> Result<Self, ConfigError> {
        Self::with_clock(config, storage, Arc::new(SystemClock))
    }

    /// Like `new`, with an explicit wall clock for object names
    pub fn with_clock(
        config: OutputConfig,
        storage: Arc<dyn StorageClient>,
        clock: Arc<dyn WallClock>,
    ) -> Result<Self, ConfigError> {
        let template = config.validate()?;
        let resources = WorkerResources {
            settings: Arc::new(config.worker_settings()),
            template: Arc::new(template),
            storage,
            clock,
        };

        info!(
            output_id = %config.output_id,
            bucket = %config.bucket,
            template = %config.object_name_template,
            buffer_size_kib = config.buffer_size_kib,
            buffer_timeout_seconds = config.buffer_timeout_seconds,
            compression = %config.compression,
            "output initialized"
        );

        Ok(OutputInstance {
            config,
            resources,
            workers: HashMap::new(),
        })
    }

    /// Build an instance whose storage comes from `config.store`
    pub fn from_config(config: OutputConfig) -> Result<Self, ConfigError> {
        let storage = create_storage(&config.store)?;
        Self::new(config, storage)
    }

    pub fn output_id(&self) -> &str {
        &self.config.output_id
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// Worker for `tag`, if one has been created
    pub fn worker(&self, tag: &str) -> Option<&ObjectWorkerHandle> {
        self.workers.get(tag).map(|entry| &entry.handle)
    }

    /// Tags with a live worker
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.workers.keys().map(String::as_str)
    }

    fn worker_for(&mut self, tag: &str) -> ObjectWorkerHandle {
        if let Some(entry) = self.workers.get(tag) {
            if entry.handle.is_running() {
                return entry.handle.clone();
            }
            warn!(tag, "object worker stopped unexpectedly, starting a new one");
        }

        let (handle, task) = spawn_object_worker(tag, self.resources.clone());
        debug!(output_id = %self.config.output_id, tag, "created object worker");
        self.workers.insert(
            tag.to_string(),
            WorkerEntry {
                handle: handle.clone(),
                task,
            },
        );
        handle
    }

    /// Append an encoded batch to the object for `tag`
    pub async fn flush(&mut self, tag: &str, payload: impl Into<Bytes>) -> FlushStatus {
        let payload = payload.into();
        let size = payload.len();
        let worker = self.worker_for(tag);

        match worker.put(payload).await {
            Ok(()) => {
                debug!(tag, bytes = size, "batch appended");
                FlushStatus::Ok
            }
            Err(e) => {
                warn!(tag, error = %e, "batch not stored, asking for retry");
                FlushStatus::Retry
            }
        }
    }

    /// Encode `records` and flush them for `tag`
    pub async fn flush_records(&mut self, tag: &str, records: &[LogRecord]) -> FlushStatus {
        let payload = encode_batch(tag, records);
        self.flush(tag, payload).await
    }

    /// Commit every open object now
    pub async fn commit_all(&self) {
        let commits = self.workers.iter().map(|(tag, entry)| async move {
            if let Err(e) = entry.handle.commit().await {
                error!(tag = %tag, error = %e, "commit failed");
            }
        });
        join_all(commits).await;
    }

    /// Commit every open object and stop all workers. Never fails; errors are logged.
    pub async fn shutdown(&mut self) {
        let workers: Vec<(String, WorkerEntry)> = self.workers.drain().collect();
        let count = workers.len();

        let stops = workers.into_iter().map(|(tag, entry)| async move {
            if let Err(e) = entry.handle.shutdown().await {
                error!(tag = %tag, error = %e, "commit on shutdown failed");
            }
            if let Err(e) = entry.task.await {
                error!(tag = %tag, error = %e, "object worker task failed");
            }
        });
        join_all(stops).await;

        info!(output_id = %self.config.output_id, workers = count, "output shut down");
    }
}

/// All configured outputs, keyed by output id
#[derive(Default)]
pub struct OutputRegistry {
    instances: HashMap<String, OutputInstance>,
}

impl OutputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance, replacing any previous one with the same id.
    ///
    /// Returns the replaced instance so the caller can shut it down.
    pub fn register(&mut self, instance: OutputInstance) -> Option<OutputInstance> {
        self.instances
            .insert(instance.output_id().to_string(), instance)
    }

    pub fn get_mut(&mut self, output_id: &str) -> Option<&mut OutputInstance> {
        self.instances.get_mut(output_id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Flush to the instance registered as `output_id`
    pub async fn flush(&mut self, output_id: &str, tag: &str, payload: impl Into<Bytes>) -> FlushStatus {
        match self.instances.get_mut(output_id) {
            Some(instance) => instance.flush(tag, payload).await,
            None => {
                error!(output_id, "no output registered with this id");
                FlushStatus::Retry
            }
        }
    }

    /// Shut down every instance
    pub async fn shutdown_all(&mut self) {
        let stops = self
            .instances
            .values_mut()
            .map(|instance| instance.shutdown());
        join_all(stops).await;
        self.instances.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::clock::SimulatedClock;
    use crate::output::compression::Compression;
    use crate::output::worker::WorkerState;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn config(output_id: &str) -> OutputConfig {
        OutputConfig {
            object_name_template: "{{ tag }}/{{ uuid }}".to_string(),
            ..OutputConfig::new(output_id, "logs")
        }
    }

    fn instance(config: OutputConfig) -> (OutputInstance, InMemoryStorage) {
        let storage = InMemoryStorage::new();
        let clock = SimulatedClock::at(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        let instance =
            OutputInstance::with_clock(config, Arc::new(storage.clone()), Arc::new(clock)).unwrap();
        (instance, storage)
    }

    #[tokio::test]
    async fn test_one_worker_per_tag() {
        let (mut output, storage) = instance(config("out"));

        assert_eq!(output.flush("cpu", &b"a\n"[..]).await, FlushStatus::Ok);
        assert_eq!(output.flush("mem", &b"b\n"[..]).await, FlushStatus::Ok);
        assert_eq!(output.flush("cpu", &b"c\n"[..]).await, FlushStatus::Ok);

        let mut tags: Vec<&str> = output.tags().collect();
        tags.sort_unstable();
        assert_eq!(tags, vec!["cpu", "mem"]);
        assert_eq!(storage.stats().opened, 2);

        let cpu = output.worker("cpu").unwrap().status().await.unwrap();
        assert_eq!(cpu.state, WorkerState::Streaming);
        assert_eq!(cpu.bytes_written, 4);
    }

    #[tokio::test]
    async fn test_shutdown_commits_everything() {
        let (mut output, storage) = instance(config("out"));
        output.flush("cpu", &b"a\n"[..]).await;
        output.flush("mem", &b"b\n"[..]).await;

        output.shutdown().await;

        assert_eq!(storage.stats().committed, 2);
        assert!(output.worker("cpu").is_none());
        let mut paths: Vec<String> = storage.objects().into_iter().map(|o| o.path).collect();
        paths.sort();
        assert!(paths[0].starts_with("cpu/"));
        assert!(paths[1].starts_with("mem/"));
    }

    #[tokio::test]
    async fn test_commit_all_keeps_workers() {
        let (mut output, storage) = instance(config("out"));
        output.flush("cpu", &b"a\n"[..]).await;

        output.commit_all().await;
        assert_eq!(storage.stats().committed, 1);

        assert_eq!(output.flush("cpu", &b"b\n"[..]).await, FlushStatus::Ok);
        assert_eq!(storage.stats().opened, 2);
    }

    #[tokio::test]
    async fn test_flush_records_encodes_lines() {
        let mut cfg = config("out");
        cfg.compression = Compression::None;
        let (mut output, storage) = instance(cfg);

        let ts = Utc.timestamp_opt(100, 0).unwrap();
        let fields = json!({"msg": "hi"}).as_object().unwrap().clone();
        let status = output
            .flush_records("app", &[LogRecord::new(ts, fields)])
            .await;
        assert_eq!(status, FlushStatus::Ok);

        output.shutdown().await;
        let data = String::from_utf8(storage.objects()[0].data.clone()).unwrap();
        assert_eq!(data, "app: [100.0,{\"msg\":\"hi\"}]\n");
    }

    #[tokio::test]
    async fn test_invalid_template_rejected() {
        let mut cfg = config("out");
        cfg.object_name_template = "{{ nope }}".to_string();
        let result = OutputInstance::new(cfg, Arc::new(InMemoryStorage::new()));
        assert!(matches!(result, Err(ConfigError::InvalidTemplate(_))));
    }

    #[tokio::test]
    async fn test_storage_failure_asks_for_retry() {
        use crate::output::simulated_store::{SimulatedStorage, SimulatedStoreConfig};

        let sim = SimulatedStorage::new(
            InMemoryStorage::new(),
            9,
            SimulatedStoreConfig {
                open_fail_prob: 1.0,
                ..SimulatedStoreConfig::no_faults()
            },
        );
        let mut output = OutputInstance::new(config("out"), Arc::new(sim)).unwrap();
        assert_eq!(output.flush("cpu", &b"x"[..]).await, FlushStatus::Retry);
    }

    #[test]
    fn test_create_storage_memory_and_local() {
        let memory = create_storage(&StoreConfig {
            kind: StoreKind::Memory,
            ..StoreConfig::default()
        })
        .unwrap();
        assert_eq!(memory.scheme(), "mem");

        let local = create_storage(&StoreConfig::default()).unwrap();
        assert_eq!(local.scheme(), "file");
    }

    #[cfg(not(feature = "cloud"))]
    #[test]
    fn test_cloud_store_requires_feature() {
        let result = create_storage(&StoreConfig {
            kind: StoreKind::Gcs,
            ..StoreConfig::default()
        });
        assert!(matches!(result, Err(ConfigError::UnsupportedStore(_))));
    }

    #[tokio::test]
    async fn test_registry_routes_and_shuts_down() {
        let (first, first_storage) = instance(config("first"));
        let (second, second_storage) = instance(config("second"));

        let mut registry = OutputRegistry::new();
        assert!(registry.register(first).is_none());
        assert!(registry.register(second).is_none());
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.flush("first", "cpu", &b"1"[..]).await, FlushStatus::Ok);
        assert_eq!(registry.flush("second", "cpu", &b"2"[..]).await, FlushStatus::Ok);
        assert_eq!(registry.flush("missing", "cpu", &b"3"[..]).await, FlushStatus::Retry);

        registry.shutdown_all().await;
        assert!(registry.is_empty());
        assert_eq!(first_storage.objects()[0].data, b"1");
        assert_eq!(second_storage.objects()[0].data, b"2");
    }
}
