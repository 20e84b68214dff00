//! Physical module identities, the module catalog, and discovery.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::probe::PresenceProbe;

/// Hardware category of an input module, derived from its product id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleCategory {
    Keyboard,
    Numpad,
    Macropad,
    Other,
}

/// One physical input module.
///
/// Identity is (vendor, product) only: the raw device node churns across
/// hotplug cycles and never participates in equality or hashing.
#[derive(Debug, Clone)]
pub struct Target {
    pub vid: u16,
    pub pid: u16,
    pub node: Option<PathBuf>,
    pub category: ModuleCategory,
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.vid == other.vid && self.pid == other.pid
    }
}

impl Eq for Target {}

impl std::hash::Hash for Target {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.vid.hash(state);
        self.pid.hash(state);
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vid, self.pid)
    }
}

/// One catalog row: a known product id and what it is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub pid: u16,
    pub category: ModuleCategory,
    #[serde(default)]
    pub label: Option<String>,
}

/// Ordered catalog of known module product ids.
///
/// Probe order is catalog order, which makes discovery order stable and
/// keeps keyboards first so master selection is deterministic.
#[derive(Debug, Clone)]
pub struct ModuleCatalog {
    entries: Vec<ModuleSpec>,
}

impl ModuleCatalog {
    /// The built-in FW16 input-module catalog.
    pub fn builtin() -> Self {
        let entry = |pid, category, label: &str| ModuleSpec {
            pid,
            category,
            label: Some(label.to_string()),
        };
        Self {
            entries: vec![
                entry(0x0012, ModuleCategory::Keyboard, "ANSI keyboard"),
                entry(0x0018, ModuleCategory::Keyboard, "ISO keyboard"),
                entry(0x0019, ModuleCategory::Keyboard, "JIS keyboard"),
                entry(0x0014, ModuleCategory::Numpad, "numpad"),
                entry(0x0013, ModuleCategory::Macropad, "RGB macropad"),
            ],
        }
    }

    /// Builtin catalog extended (or overridden, by pid) from configuration.
    pub fn with_extensions(extra: &[ModuleSpec]) -> Self {
        let mut catalog = Self::builtin();
        for spec in extra {
            match catalog.entries.iter_mut().find(|e| e.pid == spec.pid) {
                Some(existing) => *existing = spec.clone(),
                None => catalog.entries.push(spec.clone()),
            }
        }
        catalog
    }

    pub fn entries(&self) -> &[ModuleSpec] {
        &self.entries
    }

    /// Category for a product id; ids outside the catalog fold into Other.
    pub fn category_of(&self, pid: u16) -> ModuleCategory {
        self.entries
            .iter()
            .find(|e| e.pid == pid)
            .map_or(ModuleCategory::Other, |e| e.category)
    }

    pub fn label_of(&self, pid: u16) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.pid == pid)
            .and_then(|e| e.label.as_deref())
    }
}

/// Parses a manual target of the form `32ac:0012` (hex, no 0x prefix).
pub fn parse_manual(spec: &str) -> Result<(u16, u16)> {
    let Some((vid, pid)) = spec.split_once(':') else {
        bail!("manual target `{spec}` is not of the form vid:pid");
    };
    let vid = u16::from_str_radix(vid.trim(), 16)
        .with_context(|| format!("bad vendor id in manual target `{spec}`"))?;
    let pid = u16::from_str_radix(pid.trim(), 16)
        .with_context(|| format!("bad product id in manual target `{spec}`"))?;
    Ok((vid, pid))
}

pub fn format_targets(targets: &[Target]) -> String {
    targets
        .iter()
        .map(Target::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Enumerates physical modules through the presence probe.
pub struct TargetRegistry {
    probe: Arc<dyn PresenceProbe>,
    vendor_ids: Vec<u16>,
    catalog: ModuleCatalog,
    manual: Vec<(u16, u16)>,
}

impl TargetRegistry {
    pub fn new(
        probe: Arc<dyn PresenceProbe>,
        vendor_ids: Vec<u16>,
        catalog: ModuleCatalog,
        manual: Vec<(u16, u16)>,
    ) -> Self {
        Self {
            probe,
            vendor_ids,
            catalog,
            manual,
        }
    }

    /// One full scan: probe the catalog per vendor id, then append manual
    /// targets unconditionally. Deduplicated by identity, discovery order
    /// preserved.
    pub fn discover(&self) -> Vec<Target> {
        let mut found: Vec<Target> = Vec::new();

        for &vid in &self.vendor_ids {
            for spec in self.catalog.entries() {
                if !self.probe.present(vid, spec.pid) {
                    continue;
                }
                let target = Target {
                    vid,
                    pid: spec.pid,
                    node: self.probe.resolve_node(vid, spec.pid),
                    category: spec.category,
                };
                if !found.contains(&target) {
                    found.push(target);
                }
            }
        }

        // Manual targets skip the presence check but still get a
        // best-effort node.
        for &(vid, pid) in &self.manual {
            let target = Target {
                vid,
                pid,
                node: self.probe.resolve_node(vid, pid),
                category: self.catalog.category_of(pid),
            };
            if !found.contains(&target) {
                debug!("manual target {target} included without probing");
                found.push(target);
            }
        }

        found
    }

    /// Info-logs what a scan found, one line per known model.
    pub fn log_discovered(&self, targets: &[Target]) {
        for target in targets {
            match self.catalog.label_of(target.pid) {
                Some(label) => info!("found {label} ({target})"),
                None => info!("found module {target}"),
            }
        }
        info!("targets: {}", format_targets(targets));
    }
}
