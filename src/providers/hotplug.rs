//! Service provider for the kernel uevent monitor.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    hotplug::{self, HotplugEvent},
    providers::traits::ServiceProvider,
    task_manager::TaskSet,
};

/// Forwards kernel uevents into the engine's hotplug channel.
///
/// Non-critical: the monitor handles an unopenable uevent socket itself
/// by logging once and idling out, and the coordinator tolerates the
/// whole service failing. The daemon then simply never reacts to
/// hotplug.
pub struct HotplugServiceProvider {
    tx: mpsc::Sender<HotplugEvent>,
}

impl HotplugServiceProvider {
    pub fn new(tx: mpsc::Sender<HotplugEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ServiceProvider for HotplugServiceProvider {
    async fn start(&self, tasks: &mut TaskSet) -> Result<()> {
        let tx = self.tx.clone();
        tasks.spawn(self.name(), move |token| hotplug::run_monitor(tx, token));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "HotplugMonitor"
    }

    fn priority(&self) -> i32 {
        5
    }
}
