//! Service provider wrapping the sync engine task.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::{engine::SyncEngine, providers::traits::ServiceProvider, task_manager::TaskSet};

/// Runs the sync engine as the daemon's core service.
///
/// Critical: without the engine there is nothing to bridge. The engine
/// is consumed by its task, so starting twice is an error.
pub struct SyncEngineServiceProvider {
    engine: Mutex<Option<SyncEngine>>,
}

impl SyncEngineServiceProvider {
    pub fn new(engine: SyncEngine) -> Self {
        Self {
            engine: Mutex::new(Some(engine)),
        }
    }
}

#[async_trait]
impl ServiceProvider for SyncEngineServiceProvider {
    async fn start(&self, tasks: &mut TaskSet) -> Result<()> {
        let engine = self
            .engine
            .lock()
            .map_err(|_| anyhow::anyhow!("engine slot poisoned"))?
            .take()
            .ok_or_else(|| anyhow::anyhow!("sync engine already started"))?;

        tasks.spawn(self.name(), |token| engine.run(token));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SyncEngine"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_critical(&self) -> bool {
        true
    }
}
