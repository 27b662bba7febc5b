//! Best-effort background tasks.
//!
//! Notifications to other members must not fail the operation that caused
//! them. They run on their own task; failures are logged, and the caller may
//! still wait for the outcome through the returned handle.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

/// Handle on a best-effort task.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    handle: JoinHandle<Result<()>>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task. A panic or a cancellation becomes
    /// [`EngineError::TaskFailed`].
    pub async fn join(self) -> Result<()> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!(task = %self.name, panic = e.is_panic(), "task did not complete");
                Err(EngineError::TaskFailed(self.name))
            }
        }
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// Spawn a task whose error is logged rather than propagated.
pub fn spawn_best_effort<F>(name: impl Into<String>, future: F) -> TaskHandle
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.into();
    let task = name.clone();
    let handle = tokio::spawn(async move {
        let result = future.await;
        match &result {
            Ok(()) => debug!(task = %task, "task done"),
            Err(e) => warn!(task = %task, error = %e, "task failed"),
        }
        result
    });
    TaskHandle { name, handle }
}
