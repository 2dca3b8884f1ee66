//! Memory sampling for the worker process.
//!
//! The restart policy asks for a reading after every sub-task. Sampling must
//! never abort the job it observes, so every failure path collapses into
//! [`MemoryReading::unknown`].

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::debug;

/// A single memory reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct MemoryReading {
    /// Resident set size in bytes, `None` when sampling failed.
    pub resident_bytes: Option<u64>,
    /// Share of total system memory, `None` when sampling failed.
    pub percent_of_system: Option<f32>,
}

impl MemoryReading {
    /// Sentinel returned when the process could not be sampled.
    pub fn unknown() -> Self {
        Self {
            resident_bytes: None,
            percent_of_system: None,
        }
    }

    pub fn known(resident_bytes: u64, total_bytes: u64) -> Self {
        let percent_of_system = if total_bytes > 0 {
            Some((resident_bytes as f64 / total_bytes as f64 * 100.0) as f32)
        } else {
            None
        };
        Self {
            resident_bytes: Some(resident_bytes),
            percent_of_system,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.resident_bytes.is_none()
    }

    /// An unknown reading never exceeds a threshold.
    pub fn exceeds(&self, threshold_bytes: u64) -> bool {
        matches!(self.resident_bytes, Some(bytes) if bytes > threshold_bytes)
    }
}

/// Source of memory readings used by the restart policy.
pub trait ResourceMonitor: Send + Sync {
    fn sample(&self) -> MemoryReading;
}

/// Samples the current process via `sysinfo`.
///
/// With `include_descendants` the reading is the sum over the process and
/// every process below it in the tree. The browser runs as a child process,
/// so this is the setting the worker uses.
pub struct ProcessMemoryMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
    include_descendants: bool,
}

impl ProcessMemoryMonitor {
    pub fn current_process() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                debug!(error = %e, "current pid unavailable, memory readings will be unknown");
                None
            }
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
            include_descendants: false,
        }
    }

    pub fn with_descendants(mut self) -> Self {
        self.include_descendants = true;
        self
    }
}

impl ResourceMonitor for ProcessMemoryMonitor {
    fn sample(&self) -> MemoryReading {
        let Some(root) = self.pid else {
            return MemoryReading::unknown();
        };
        let Ok(mut system) = self.system.lock() else {
            return MemoryReading::unknown();
        };

        system.refresh_memory();
        system.refresh_processes(ProcessesToUpdate::All, true);

        if system.process(root).is_none() {
            return MemoryReading::unknown();
        }

        let resident = if self.include_descendants {
            tree_memory(&system, root)
        } else {
            system.process(root).map(|p| p.memory()).unwrap_or(0)
        };

        MemoryReading::known(resident, system.total_memory())
    }
}

/// Sum of resident memory for `root` and all of its descendants.
fn tree_memory(system: &System, root: Pid) -> u64 {
    // Threads show up as tasks on Linux and would double count.
    let parents: HashMap<Pid, Option<Pid>> = system
        .processes()
        .iter()
        .filter(|(_, p)| p.thread_kind().is_none())
        .map(|(pid, p)| (*pid, p.parent()))
        .collect();

    system
        .processes()
        .iter()
        .filter(|(_, p)| p.thread_kind().is_none())
        .filter(|(pid, _)| descends_from(**pid, root, &parents))
        .map(|(_, p)| p.memory())
        .sum()
}

fn descends_from(pid: Pid, root: Pid, parents: &HashMap<Pid, Option<Pid>>) -> bool {
    let mut current = Some(pid);
    // Bounded walk; pid tables can contain cycles while processes are reaped.
    for _ in 0..64 {
        match current {
            Some(p) if p == root => return true,
            Some(p) => current = parents.get(&p).copied().flatten(),
            None => return false,
        }
    }
    false
}
