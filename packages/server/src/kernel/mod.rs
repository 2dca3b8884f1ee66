//! Kernel module - job orchestration infrastructure.

pub mod jobs;

pub use jobs::{Job, JobRegistry, JobState, Supervisor, SupervisorError, SupervisorOptions, UnitCatalog};
