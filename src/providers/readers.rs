//! Service provider for the per-context virtual-device readers.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    engine::LedEvent,
    providers::traits::ServiceProvider,
    task_manager::TaskSet,
    uleds::{self, UledsBacklight, VirtualBacklight},
};

/// Spawns one reader task per virtual backlight, each decoding external
/// brightness writes and forwarding them into the engine's channel.
///
/// Critical: a context whose reader is missing never sees user intent.
pub struct ReaderServiceProvider {
    backlights: Vec<Arc<UledsBacklight>>,
    tx: mpsc::Sender<LedEvent>,
}

impl ReaderServiceProvider {
    pub fn new(backlights: Vec<Arc<UledsBacklight>>, tx: mpsc::Sender<LedEvent>) -> Self {
        Self { backlights, tx }
    }
}

#[async_trait]
impl ServiceProvider for ReaderServiceProvider {
    async fn start(&self, tasks: &mut TaskSet) -> Result<()> {
        for (ctx, backlight) in self.backlights.iter().enumerate() {
            let backlight = backlight.clone();
            let tx = self.tx.clone();
            tasks.spawn(format!("led-reader-{}", backlight.name()), move |token| {
                uleds::run_reader(backlight, ctx, tx, token)
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LedReaders"
    }

    fn priority(&self) -> i32 {
        9
    }

    fn is_critical(&self) -> bool {
        true
    }
}
