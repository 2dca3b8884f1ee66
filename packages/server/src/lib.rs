// Harvest Server - job supervisor for extraction workers
//
// This crate spawns scraper workers as isolated processes, tracks their
// lifecycle in memory, serves their logs, and cancels them on request.
// The HTTP surface in server/ is a thin layer over kernel/jobs.

pub mod config;
pub mod kernel;
pub mod server;

pub use config::*;
