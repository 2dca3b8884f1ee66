// Harvest Worker - resource-bounded extraction loop
//
// One worker holds one expensive resource (a browser process), walks an
// ordered list of sub-tasks, persists each sub-task's records as soon as it
// ends, and recycles the resource between sub-tasks under a restart policy.

pub mod browser;
pub mod error;
pub mod monitor;
pub mod resource;
pub mod settings;
pub mod sink;
pub mod unit_of_work;
pub mod upload;
pub mod worker;

pub use error::{ResourceError, SinkError, SubtaskError, UploadError, WorkerError};
pub use monitor::{MemoryReading, ProcessMemoryMonitor, ResourceMonitor};
pub use resource::{ManagedResource, ResourceFactory, RestartPolicy, RestartReason};
pub use settings::WorkerSettings;
pub use unit_of_work::{BatchResult, Record, Subtask, UnitOfWork};
pub use worker::{SubtaskReport, Worker, WorkerOptions, WorkerReport};
