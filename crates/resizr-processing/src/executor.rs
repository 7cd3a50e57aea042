//! Pinned execution slots
//!
//! Each invocation takes one permit and runs start to finish inside a single
//! blocking task, so every engine call on a raster happens on one OS thread.

use resizr_core::{TransformError, TransformResult};
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct PinnedExecutor {
    permits: Arc<Semaphore>,
    slots: usize,
}

impl PinnedExecutor {
    pub fn new(slots: usize) -> Self {
        let slots = slots.max(1);
        Self {
            permits: Arc::new(Semaphore::new(slots)),
            slots,
        }
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` on a blocking thread once a slot is free
    pub async fn run<F, T>(&self, job: F) -> TransformResult<T>
    where
        F: FnOnce() -> TransformResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| TransformError::engine("executor", e.to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| TransformError::engine("executor", format!("worker failed: {}", e)))?
    }
}
