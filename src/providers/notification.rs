//! Service provider for the desktop notification fan-out.

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::{
    config::NotifierCfg,
    event::{Event, EventBus},
    notify,
    providers::traits::ServiceProvider,
    task_manager::TaskSet,
};

/// Watches the event bus and announces hardware-driven level changes to
/// the configured session consumers.
///
/// Non-critical and fully decoupled from the engine's timing: consumers
/// are spawned fire-and-forget, never awaited.
pub struct NotificationServiceProvider {
    notifiers: Vec<NotifierCfg>,
    event_bus: EventBus,
}

impl NotificationServiceProvider {
    pub fn new(notifiers: Vec<NotifierCfg>, event_bus: EventBus) -> Self {
        Self {
            notifiers,
            event_bus,
        }
    }
}

#[async_trait]
impl ServiceProvider for NotificationServiceProvider {
    async fn start(&self, tasks: &mut TaskSet) -> Result<()> {
        let notifiers = self.notifiers.clone();
        let mut rx = self.event_bus.subscribe();

        tasks.spawn(self.name(), move |token| async move {
            run_notification_service(notifiers, &mut rx, token).await
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Notifications"
    }

    fn priority(&self) -> i32 {
        3
    }
}

async fn run_notification_service(
    notifiers: Vec<NotifierCfg>,
    rx: &mut tokio::sync::broadcast::Receiver<Event>,
    token: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            () = token.cancelled() => return Ok(()),
            event = rx.recv() => match event {
                Ok(Event::LevelSynced { level, .. }) => notify::dispatch(&notifiers, level),
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("notification service lagged by {n} events"),
                Err(RecvError::Closed) => {
                    debug!("event bus closed; notification service exiting");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brightness::Level;
    use std::time::Duration;

    #[tokio::test]
    async fn service_consumes_level_events_until_cancelled() {
        let bus = EventBus::new();
        let mut tasks = TaskSet::new();
        let provider = NotificationServiceProvider::new(vec![], bus.clone());

        provider.start(&mut tasks).await.unwrap();
        assert!(tasks.is_running("Notifications"));

        bus.publish(Event::LevelSynced {
            context: "framework::kbd_backlight".into(),
            level: Level::High,
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        tasks.shutdown_all().await.unwrap();
    }
}
