//! Detached background work.
//!
//! Work the caller must not wait for (cache revalidation, update checks) runs
//! on its own task. Its result is observed, logged and dropped; it never
//! reaches the response path.

use crate::ServiceWorkerError;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handle to a detached task.
///
/// Dropping the handle does not cancel the task.
#[derive(Debug)]
pub struct BackgroundTask {
    label: &'static str,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawn `future` on the current runtime, discarding its result.
    pub fn spawn<F>(label: &'static str, future: F) -> Self
    where
        F: Future<Output = Result<(), ServiceWorkerError>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            match future.await {
                Ok(()) => debug!(task = label, "Background task finished"),
                Err(e) => debug!(task = label, error = %e, "Background task failed, result discarded"),
            }
        });
        Self { label, handle }
    }

    /// Task label used in logs.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Whether the task has completed.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to complete.
    pub async fn join(self) {
        let Self { label, handle } = self;
        if let Err(e) = handle.await {
            warn!(task = label, error = %e, "Background task did not run to completion");
        }
    }
}
