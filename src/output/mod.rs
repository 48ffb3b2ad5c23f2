//! Buffered Object Output
//!
//! Rolls a stream of record batches into discrete objects in a blob store.
//! Each stream tag gets its own worker that keeps one object open and
//! commits it when it grows past a size threshold or has been open too long.
//!
//! ## Architecture
//!
//! ```text
//! flush(tag, batch) → OutputInstance → ObjectWorker (per tag) → StorageClient
//!                                          ↓
//!                              size threshold / idle timer
//! ```
//!
//! ## Key Features
//!
//! - **Two commit triggers**: size (post-compression bytes) and idle time
//! - **Templated object names**: tag, open time, UUID
//! - **Optional gzip**: one gzip member per batch
//! - **Pluggable stores**: in-memory, local filesystem, GCS/S3 (feature `cloud`)

pub mod clock;
pub mod compression;
pub mod config;
pub mod dst;
pub mod instance;
pub mod object_name;
pub mod object_store;
pub mod record;
pub mod simulated_store;
pub mod worker;
#[cfg(feature = "cloud")]
pub mod cloud_store;

pub use clock::{SimulatedClock, SystemClock, WallClock};
pub use compression::Compression;
pub use config::{ConfigError, OutputConfig, StoreConfig, StoreKind, WorkerSettings};
pub use dst::{
    run_object_dst_batch, summarize_object_dst_batch, ObjectDSTConfig, ObjectDSTHarness,
    ObjectDSTResult,
};
pub use instance::{create_storage, FlushStatus, OutputInstance, OutputRegistry};
pub use object_name::{NameRenderContext, ObjectNameTemplate, TemplateError};
pub use object_store::{
    InMemoryStorage, LocalFsStorage, ObjectWriter, StorageClient, DEFAULT_CHUNK_SIZE,
};
pub use record::{encode_batch, LogRecord};
pub use simulated_store::{SimulatedStorage, SimulatedStoreConfig, SimulatedStoreStats};
pub use worker::{
    spawn_object_worker, ObjectWorkerHandle, WorkerError, WorkerResources, WorkerState,
    WorkerStatus, CLOSED_PATH,
};
#[cfg(feature = "cloud")]
pub use cloud_store::{CloudProvider, CloudStorage};
