//! System coordinator for service lifecycle and wiring.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use log::{error, info, warn};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;

use crate::{
    config::ConfigManager,
    context::{Context, partition},
    engine::{EngineSettings, SyncEngine},
    error::BridgeError,
    event::{Event, EventBus},
    probe::SysfsProbe,
    providers::{
        HotplugServiceProvider, NotificationServiceProvider, ReaderServiceProvider,
        ServiceProvider, SyncEngineServiceProvider,
    },
    target::{ModuleCatalog, TargetRegistry},
    task_manager::TaskSet,
    transport,
    uleds::{UledsBacklight, VirtualBacklight},
};

/// Wires discovery, partitioning, the virtual devices and the engine
/// together, then owns the service lifecycle.
///
/// Startup is fail-fast only where it has to be: empty discovery and a
/// transport that cannot initialize abort; a single context losing its
/// virtual device only drops that context, and the process goes down
/// only when no context survives.
pub struct SystemCoordinator {
    tasks: TaskSet,
    event_bus: EventBus,
    service_providers: Vec<Box<dyn ServiceProvider>>,
}

impl Default for SystemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCoordinator {
    pub fn new() -> Self {
        Self {
            tasks: TaskSet::new(),
            event_bus: EventBus::new(),
            service_providers: Vec::new(),
        }
    }

    /// Builds every component from configuration and registers the
    /// service providers in priority order.
    pub async fn initialize(&mut self, config_manager: ConfigManager) -> Result<()> {
        info!("initializing fw_backlightd");
        let config = config_manager.clone_config().await;

        let catalog = ModuleCatalog::with_extensions(&config.modules);
        let manual = config.manual_identities()?;
        let registry = TargetRegistry::new(
            Arc::new(SysfsProbe::new()),
            config.vendor_ids.clone(),
            catalog,
            manual,
        );

        let targets = registry.discover();
        registry.log_discovered(&targets);
        if targets.is_empty() {
            return Err(BridgeError::DiscoveryEmpty.into());
        }

        let mut readers = Vec::new();
        let mut pairs: Vec<(Context, Arc<dyn VirtualBacklight>)> = Vec::new();
        for context in partition(&targets, config.mode) {
            match UledsBacklight::create(&context.name, config.max_brightness) {
                Ok(backlight) => {
                    let backlight = Arc::new(backlight);
                    readers.push(backlight.clone());
                    pairs.push((context, backlight as Arc<dyn VirtualBacklight>));
                }
                Err(e) => error!("{e}; dropping this context"),
            }
        }
        if pairs.is_empty() {
            bail!("no virtual backlight device could be created");
        }

        let transport = transport::build(
            &config.transport,
            Duration::from_millis(config.io_timeout_ms),
        )
        .context("failed to initialize hardware transport")?;

        let (led_tx, led_rx) = mpsc::channel(64);
        let (hotplug_tx, hotplug_rx) = mpsc::channel(16);

        let engine = SyncEngine::new(
            EngineSettings {
                debounce: Duration::from_millis(config.debounce_ms),
                poll: (config.poll_seconds > 0).then(|| Duration::from_secs(config.poll_seconds)),
            },
            pairs,
            transport,
            registry,
            self.event_bus.clone(),
            led_rx,
            hotplug_rx,
        );

        let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(SyncEngineServiceProvider::new(engine)),
            Box::new(ReaderServiceProvider::new(readers, led_tx)),
            Box::new(HotplugServiceProvider::new(hotplug_tx)),
            Box::new(NotificationServiceProvider::new(
                config.notifiers.clone(),
                self.event_bus.clone(),
            )),
        ];
        providers.sort_by_key(|p| std::cmp::Reverse(p.priority()));
        self.service_providers = providers;

        info!(
            "registered {} service providers",
            self.service_providers.len()
        );
        Ok(())
    }

    /// Starts all registered services in priority order.
    ///
    /// Critical services must start; non-critical ones may fail and are
    /// skipped with a warning.
    pub async fn start_all_services(&mut self) -> Result<()> {
        for provider in &self.service_providers {
            match provider.start(&mut self.tasks).await {
                Ok(()) => info!(
                    "service `{}` started (priority {}, critical: {})",
                    provider.name(),
                    provider.priority(),
                    provider.is_critical()
                ),
                Err(e) if provider.is_critical() => {
                    return Err(e).with_context(|| {
                        format!("critical service `{}` failed to start", provider.name())
                    });
                }
                Err(e) => warn!(
                    "non-critical service `{}` failed to start: {e}",
                    provider.name()
                ),
            }
        }
        Ok(())
    }

    /// Blocks until a termination signal arrives, logging engine events
    /// along the way.
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut event_rx = self.event_bus.subscribe();
        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        info!("entering main loop");

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result.context("failed to listen for interrupt")?;
                    info!("interrupt received; shutting down");
                    break;
                }

                _ = sigterm.recv() => {
                    info!("SIGTERM received; shutting down");
                    break;
                }

                event = event_rx.recv() => self.handle_event(event)?,
            }
        }

        self.shutdown().await
    }

    fn handle_event(
        &self,
        event: Result<Event, tokio::sync::broadcast::error::RecvError>,
    ) -> Result<()> {
        use tokio::sync::broadcast::error::RecvError;
        match event {
            Ok(Event::LevelSynced { context, level }) => {
                info!("{context}: level synced to {level}");
            }
            Ok(Event::TargetsChanged {
                context,
                added,
                removed,
            }) => {
                info!(
                    "{context}: membership changed ({} attached, {} detached)",
                    added.len(),
                    removed.len()
                );
            }
            Err(RecvError::Lagged(n)) => warn!("event bus lagged by {n} messages"),
            Err(RecvError::Closed) => bail!("event bus closed unexpectedly"),
        }
        Ok(())
    }

    /// Cancels and joins every service task, then releases the virtual
    /// devices and the uevent socket by dropping them.
    async fn shutdown(&mut self) -> Result<()> {
        if let Err(e) = self.tasks.shutdown_all().await {
            error!("error during task shutdown: {e}");
        }
        info!("shutdown complete");
        Ok(())
    }

    #[cfg(test)]
    pub fn running_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn a_fresh_coordinator_has_no_services() {
        let coordinator = SystemCoordinator::new();
        assert_eq!(coordinator.running_services().len(), 0);
    }

    #[tokio::test]
    async fn starting_with_no_services_is_a_noop() {
        let mut coordinator = SystemCoordinator::new();
        coordinator.start_all_services().await.unwrap();
    }
}
