use anyhow::Result;
use async_trait::async_trait;

use crate::task_manager::TaskSet;

/// A service that can be started into the shared task set.
///
/// Services carry a startup priority (higher starts first) and a
/// criticality flag: a critical service failing to start aborts the
/// daemon, a non-critical one is logged and skipped.
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Starts the service's task(s).
    async fn start(&self, tasks: &mut TaskSet) -> Result<()>;

    /// Service name for logging and management.
    fn name(&self) -> &'static str;

    /// Startup priority; higher numbers start first.
    fn priority(&self) -> i32 {
        0
    }

    /// Whether the daemon can live without this service.
    fn is_critical(&self) -> bool {
        false
    }
}
