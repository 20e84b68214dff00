//! Presence probing against the platform HID bus.
//!
//! The sysfs implementation answers "is a module with this identity
//! enumerated right now" by scanning device uevent files for the
//! kernel's HID identity marker. Probe failures of any kind read as
//! "absent"; a scan never aborts discovery.

use std::fs;
use std::path::{Path, PathBuf};

#[cfg(test)]
use mockall::automock;

/// Read-only query for physical module presence.
#[cfg_attr(test, automock)]
pub trait PresenceProbe: Send + Sync {
    /// Whether a module with this (vendor, product) identity is present.
    fn present(&self, vid: u16, pid: u16) -> bool;

    /// Best-effort resolution of the module's raw device node.
    fn resolve_node(&self, vid: u16, pid: u16) -> Option<PathBuf>;
}

/// Probe backed by `/sys/bus/hid/devices` enumeration.
pub struct SysfsProbe {
    root: PathBuf,
}

impl SysfsProbe {
    pub fn new() -> Self {
        Self::with_root("/sys/bus/hid/devices")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    // uevent carries a line like HID_ID=0003:000032AC:00000012
    fn identity_needle(vid: u16, pid: u16) -> String {
        format!(":0000{vid:04X}:0000{pid:04X}")
    }

    fn device_dir(&self, vid: u16, pid: u16) -> Option<PathBuf> {
        let needle = Self::identity_needle(vid, pid);
        for entry in fs::read_dir(&self.root).ok()? {
            let Ok(entry) = entry else { continue };
            let dir = entry.path();
            let Ok(uevent) = fs::read_to_string(dir.join("uevent")) else {
                continue;
            };
            if uevent.contains(&needle) {
                return Some(dir);
            }
        }
        None
    }
}

impl Default for SysfsProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceProbe for SysfsProbe {
    fn present(&self, vid: u16, pid: u16) -> bool {
        self.device_dir(vid, pid).is_some()
    }

    fn resolve_node(&self, vid: u16, pid: u16) -> Option<PathBuf> {
        let dir = self.device_dir(vid, pid)?;
        for entry in fs::read_dir(dir.join("hidraw")).ok()? {
            let Ok(entry) = entry else { continue };
            let name = entry.file_name();
            if name.to_string_lossy().starts_with("hidraw") {
                return Some(Path::new("/dev").join(name));
            }
        }
        None
    }
}
