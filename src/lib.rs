//! # fw_backlightd
//!
//! A Linux daemon bridging the Framework Laptop 16's hot-pluggable
//! input-module backlights to a single virtual `kbd_backlight` control
//! that UPower and the desktop already know how to drive.
//!
//! ## How it works
//!
//! - Physical modules are discovered over the HID bus and grouped into
//!   one or more brightness contexts (unified, or one per module
//!   category).
//! - Each context registers a userspace LED; external writes to its
//!   sysfs brightness file become debounced hardware updates across all
//!   member modules.
//! - A periodic read-back path catches brightness changes made on the
//!   hardware itself and feeds them back to the desktop, including a
//!   notification fan-out.
//! - Kernel uevents drive re-discovery, so attached modules join their
//!   context at the current level and detached ones drop out cleanly.
//!
//! ## Architecture
//!
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) wires the
//!   components and owns the service lifecycle.
//! - [`SyncEngine`](engine::SyncEngine) owns all context state in one
//!   task with a single suspension point.
//! - [`EventBus`](event::EventBus) decouples the engine from the
//!   notification and logging consumers.
//!
//! ## Example
//!
//! ```no_run
//! use fw_backlightd::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load(None).await?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()
//!         .await?
//!         .run()
//!         .await
//! }
//! ```

pub mod application;
pub mod brightness;
pub mod cli;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod event;
pub mod hotplug;
pub mod notify;
pub mod probe;
pub mod providers;
pub mod reconcile;
pub mod target;
pub mod task_manager;
pub mod transport;
pub mod uleds;
