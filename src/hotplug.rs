//! Kernel hotplug events feeding reconciliation.
//!
//! The monitor listens to the whole uevent firehose; relevance filtering
//! belongs to the engine, which only cares whether an event could have
//! changed the HID module population.

use std::io;

use anyhow::Result;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_udev::{AsyncMonitorSocket, MonitorBuilder};
use tokio_util::sync::CancellationToken;

use crate::error::BridgeError;

/// A kernel uevent, reduced to the markers the reconciler looks at.
#[derive(Debug, Clone, Default)]
pub struct HotplugEvent {
    pub action: String,
    pub subsystem: Option<String>,
    pub hid_id: Option<String>,
}

impl HotplugEvent {
    /// Cheap filter applied before any rescan: HID-subsystem events and
    /// anything carrying a HID identity marker pass, the rest is noise.
    pub fn is_relevant(&self) -> bool {
        matches!(self.subsystem.as_deref(), Some("hid") | Some("hidraw"))
            || self.hid_id.is_some()
    }
}

impl From<&tokio_udev::Event> for HotplugEvent {
    fn from(event: &tokio_udev::Event) -> Self {
        Self {
            action: event.event_type().to_string(),
            subsystem: event
                .subsystem()
                .map(|s| s.to_string_lossy().into_owned()),
            hid_id: event
                .property_value("HID_ID")
                .map(|v| v.to_string_lossy().into_owned()),
        }
    }
}

fn open_monitor() -> io::Result<AsyncMonitorSocket> {
    AsyncMonitorSocket::new(MonitorBuilder::new()?.listen()?)
}

/// Forwards uevents into the engine's hotplug channel until cancelled.
///
/// An unopenable monitor socket is not fatal: the daemon keeps running,
/// it just never reacts to hotplug.
pub async fn run_monitor(tx: mpsc::Sender<HotplugEvent>, token: CancellationToken) -> Result<()> {
    let mut stream = match open_monitor() {
        Ok(stream) => stream,
        Err(e) => {
            warn!("{}", BridgeError::HotplugUnavailable(e));
            return Ok(());
        }
    };
    info!("hotplug: listening for kernel uevents");

    loop {
        tokio::select! {
            () = token.cancelled() => {
                debug!("hotplug monitor cancelled");
                return Ok(());
            }
            event = stream.next() => match event {
                Some(Ok(event)) => {
                    if tx.send(HotplugEvent::from(&event)).await.is_err() {
                        return Ok(());
                    }
                }
                Some(Err(e)) => debug!("hotplug: receive error: {e}"),
                None => {
                    warn!("hotplug: uevent stream ended");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(subsystem: Option<&str>, hid_id: Option<&str>) -> HotplugEvent {
        HotplugEvent {
            action: "add".into(),
            subsystem: subsystem.map(str::to_string),
            hid_id: hid_id.map(str::to_string),
        }
    }

    #[test]
    fn hid_subsystem_events_are_relevant() {
        assert!(event(Some("hid"), None).is_relevant());
        assert!(event(Some("hidraw"), None).is_relevant());
    }

    #[test]
    fn hid_identity_marker_is_relevant_regardless_of_subsystem() {
        assert!(event(Some("usb"), Some("0003:000032AC:00000012")).is_relevant());
    }

    #[test]
    fn unrelated_subsystems_are_noise() {
        assert!(!event(Some("block"), None).is_relevant());
        assert!(!event(None, None).is_relevant());
    }
}
