//! Event-driven communication between the engine and auxiliary services.

use anyhow::Result;
use tokio::sync::broadcast;

use crate::brightness::Level;
use crate::target::Target;

/// Events published by the sync engine.
///
/// Consumers subscribe through the [`EventBus`]; the engine never waits
/// on them.
#[derive(Debug, Clone)]
pub enum Event {
    /// Hardware changed brightness outside the virtual-device path and
    /// the engine adopted the new level.
    LevelSynced { context: String, level: Level },
    /// Hotplug reconciliation changed a context's membership.
    TargetsChanged {
        context: String,
        added: Vec<Target>,
        removed: Vec<Target>,
    },
}

/// Publish-subscribe bus decoupling the engine from notification and
/// logging consumers.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    #[cfg(test)]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns an error if there are no active subscribers.
    pub fn publish(&self, event: Event) -> Result<()> {
        self.sender.send(event)?;
        Ok(())
    }

    /// Creates a new subscriber receiving events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
