//! Task management for async service lifecycle.

use std::time::Duration;

use anyhow::{Context as _, Result};
use log::{debug, error, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Named background tasks sharing one cancellation tree.
///
/// Every service task gets a child token of the global one; shutdown
/// cancels the tree and joins each task with a bounded grace period.
pub struct TaskSet {
    tasks: Vec<(String, JoinHandle<Result<()>>)>,
    token: CancellationToken,
}

impl TaskSet {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            token: CancellationToken::new(),
        }
    }

    /// Spawns and tracks a task under the given name.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, task_fn: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let task_name = name.clone();
        let future = task_fn(self.token.child_token());

        let handle = tokio::spawn(async move {
            debug!("task `{task_name}` started");
            let result = future.await;
            match &result {
                Ok(()) => debug!("task `{task_name}` finished"),
                Err(e) => error!("task `{task_name}` failed: {e}"),
            }
            result
        });

        self.tasks.push((name, handle));
    }

    /// Cancels everything and joins each task, collecting the first
    /// failure.
    pub async fn shutdown_all(&mut self) -> Result<()> {
        debug!("stopping {} task(s)", self.tasks.len());
        self.token.cancel();

        let mut first_error = None;
        for (name, handle) in self.tasks.drain(..) {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => {
                    warn!("task `{name}` failed during shutdown: {e}");
                    first_error.get_or_insert(e);
                }
                Ok(Err(join_err)) => {
                    let e = anyhow::anyhow!("task `{name}` panicked: {join_err}");
                    error!("{e}");
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    let e = anyhow::anyhow!("task `{name}` ignored shutdown for {SHUTDOWN_GRACE:?}");
                    error!("{e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e).context("one or more tasks failed during shutdown"),
            None => Ok(()),
        }
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    #[cfg(test)]
    pub fn is_running(&self, name: &str) -> bool {
        self.tasks.iter().any(|(n, _)| n == name)
    }
}

impl Default for TaskSet {
    fn default() -> Self {
        Self::new()
    }
}
