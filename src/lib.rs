pub mod observability;
pub mod output;

pub use output::{
    FlushStatus, LogRecord, ObjectWorkerHandle, OutputConfig, OutputInstance, OutputRegistry,
    StorageClient,
};
