//! Job orchestration for worker processes.
//!
//! - [`Supervisor`] - resolves units, spawns workers, cancels them
//! - [`JobRegistry`] - concurrency-safe in-memory job table
//! - [`UnitCatalog`] - job names to executable units
//! - [`Job`] - lifecycle record for one worker invocation
//!
//! # Architecture
//!
//! ```text
//! HTTP route ──► Supervisor.start(unit, env)
//!                    ├─► UnitCatalog.resolve(unit)
//!                    ├─► LogSink (run_<id>.log)
//!                    ├─► JobRegistry.register(job)
//!                    └─► watcher task ──► JobRegistry.update(id, finish)
//!
//! HTTP route ──► Supervisor.status / list / cancel / read_log
//! ```
//!
//! The registry lives only as long as the supervising process; a restart
//! forgets every job.

mod catalog;
mod error;
mod job;
mod log_sink;
mod registry;
mod supervisor;

pub use catalog::{ResolvedUnit, UnitCatalog, UnitSpec};
pub use error::{CatalogError, RegistryError, SupervisorError};
pub use job::{Job, JobHandle, JobState};
pub use log_sink::{LogChunk, DEFAULT_READ_LIMIT, MAX_READ_LIMIT};
pub use registry::JobRegistry;
pub use supervisor::{Supervisor, SupervisorOptions};
