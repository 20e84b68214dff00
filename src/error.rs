//! Error taxonomy for the bridge core.
//!
//! Fatality rules: [`BridgeError::DiscoveryEmpty`] aborts startup;
//! [`BridgeError::DeviceUnavailable`] drops one context and aborts only
//! when no context survives; everything else is logged and retried by the
//! next cycle.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The virtual backlight device could not be provisioned.
    #[error("virtual backlight `{name}` unavailable: {source}")]
    DeviceUnavailable {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Startup discovery found no physical modules at all.
    #[error("no backlight modules detected")]
    DiscoveryEmpty,

    /// The kernel uevent stream could not be opened. The daemon keeps
    /// running, it just never sees hotplug.
    #[error("hotplug event stream unavailable: {0}")]
    HotplugUnavailable(#[source] std::io::Error),
}

/// Per-call hardware transport failures. Never fatal for the engine loop.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("apply to {target} failed: {reason}")]
    ApplyFailed { target: String, reason: String },

    #[error("read from {target} failed: {reason}")]
    ReadFailed { target: String, reason: String },

    #[error("{op} on {target} timed out after {timeout:?}")]
    Timeout {
        op: &'static str,
        target: String,
        timeout: Duration,
    },
}
