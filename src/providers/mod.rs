//! Service providers for the daemon's background tasks.
//!
//! Each provider knows how to start one service into the shared task
//! set, carrying a priority and a criticality classification the
//! coordinator uses for startup ordering and graceful degradation.

pub mod hotplug;
pub mod notification;
pub mod readers;
pub mod sync_engine;
pub mod traits;

pub use hotplug::HotplugServiceProvider;
pub use notification::NotificationServiceProvider;
pub use readers::ReaderServiceProvider;
pub use sync_engine::SyncEngineServiceProvider;
pub use traits::ServiceProvider;
