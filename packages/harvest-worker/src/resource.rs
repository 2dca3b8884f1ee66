//! Managed lifecycle for the one expensive resource a worker holds.
//!
//! A [`ManagedResource`] owns zero or one live instance produced by a
//! [`ResourceFactory`]. The instance is created lazily, recreated under a
//! [`RestartPolicy`] (sub-tasks served or memory threshold), and destroyed on
//! release. Nothing here is global: each worker loop owns its own manager.
//!
//! ```text
//! acquire() ──► run sub-task ──► record_served() ──► should_restart()?
//!    ▲                                                  │ yes
//!    └──────────────────────── restart() ◄──────────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use crate::error::ResourceError;
use crate::monitor::ResourceMonitor;

/// 1.5 GiB.
pub const DEFAULT_MEMORY_THRESHOLD_BYTES: u64 = 1536 * 1024 * 1024;

/// Creates and destroys instances of the managed resource.
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    type Handle: Send + Sync;

    async fn create(&self) -> Result<Self::Handle, ResourceError>;

    /// Destroy an instance. The instance may already be dead.
    async fn destroy(&self, handle: Self::Handle) -> Result<(), ResourceError>;
}

/// When to throw the current instance away.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RestartPolicy {
    /// Restart once this many sub-tasks were served. Zero disables the count rule.
    #[builder(default = 10)]
    pub restart_after: usize,
    /// Restart once the sampled resident memory is above this many bytes.
    #[builder(default = DEFAULT_MEMORY_THRESHOLD_BYTES)]
    pub memory_threshold_bytes: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RestartReason {
    ServedLimit { served: usize },
    MemoryThreshold { resident_bytes: u64 },
    SubtaskFailed,
}

struct Instance<H> {
    handle: H,
    generation: u64,
    created_at: DateTime<Utc>,
}

pub struct ManagedResource<F: ResourceFactory> {
    factory: F,
    monitor: Arc<dyn ResourceMonitor>,
    policy: RestartPolicy,
    current: Option<Instance<F::Handle>>,
    served: usize,
    created: u64,
    restarts: u64,
}

impl<F: ResourceFactory> ManagedResource<F> {
    pub fn new(factory: F, monitor: Arc<dyn ResourceMonitor>, policy: RestartPolicy) -> Self {
        Self {
            factory,
            monitor,
            policy,
            current: None,
            served: 0,
            created: 0,
            restarts: 0,
        }
    }

    /// Return the live instance, creating one if none exists.
    pub async fn acquire(&mut self) -> Result<&F::Handle, ResourceError> {
        let instance = match self.current.take() {
            Some(instance) => instance,
            None => self.create_instance().await?,
        };
        Ok(&self.current.insert(instance).handle)
    }

    /// Count one completed sub-task against the current instance.
    pub fn record_served(&mut self) {
        self.served += 1;
    }

    pub fn should_restart(&self) -> bool {
        self.restart_reason().is_some()
    }

    /// Evaluate the restart policy against the live instance.
    pub fn restart_reason(&self) -> Option<RestartReason> {
        self.current.as_ref()?;

        if self.policy.restart_after > 0 && self.served >= self.policy.restart_after {
            return Some(RestartReason::ServedLimit {
                served: self.served,
            });
        }

        let reading = self.monitor.sample();
        if reading.exceeds(self.policy.memory_threshold_bytes) {
            return Some(RestartReason::MemoryThreshold {
                resident_bytes: reading.resident_bytes.unwrap_or_default(),
            });
        }

        None
    }

    /// Destroy the current instance (best-effort) and create a fresh one.
    pub async fn restart(&mut self) -> Result<(), ResourceError> {
        self.destroy_current().await;
        self.restarts += 1;
        let instance = self.create_instance().await?;
        self.current = Some(instance);
        Ok(())
    }

    /// Destroy the current instance if there is one. Safe to call repeatedly.
    pub async fn release(&mut self) {
        self.destroy_current().await;
    }

    pub fn served_count(&self) -> usize {
        self.served
    }

    /// Generation of the live instance; increases with every creation.
    pub fn generation(&self) -> Option<u64> {
        self.current.as_ref().map(|i| i.generation)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.current.as_ref().map(|i| i.created_at)
    }

    pub fn created_count(&self) -> u64 {
        self.created
    }

    pub fn restart_count(&self) -> u64 {
        self.restarts
    }

    pub fn is_live(&self) -> bool {
        self.current.is_some()
    }

    async fn create_instance(&mut self) -> Result<Instance<F::Handle>, ResourceError> {
        let handle = self.factory.create().await?;
        self.created += 1;
        self.served = 0;
        info!(generation = self.created, "resource created");
        Ok(Instance {
            handle,
            generation: self.created,
            created_at: Utc::now(),
        })
    }

    async fn destroy_current(&mut self) {
        let Some(instance) = self.current.take() else {
            return;
        };
        let generation = instance.generation;
        let served = self.served;
        self.served = 0;

        match self.factory.destroy(instance.handle).await {
            Ok(()) => info!(generation, served, "resource destroyed"),
            Err(e) => warn!(generation, served, error = %e, "resource destruction failed, continuing"),
        }
    }
}

impl<F: ResourceFactory> Drop for ManagedResource<F> {
    fn drop(&mut self) {
        if let Some(instance) = &self.current {
            warn!(
                generation = instance.generation,
                "managed resource dropped without release"
            );
        }
    }
}
