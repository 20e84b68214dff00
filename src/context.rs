//! Logical brightness groups and the partition policy.
//!
//! A context owns one virtual backlight and one level shared by all of
//! its member modules. Unified mode folds every module into a single
//! context; separate mode gives each hardware category present its own.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::brightness::Level;
use crate::target::{ModuleCategory, Target};

/// How discovered modules are grouped into contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Unified,
    Separate,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Unified
    }
}

// UPower only adopts LEDs whose name carries the kbd_backlight marker,
// so every context name must keep it.
const UNIFIED_NAME: &str = "framework::kbd_backlight";

fn category_name(category: ModuleCategory) -> &'static str {
    match category {
        ModuleCategory::Keyboard => "framework::kbd_backlight",
        ModuleCategory::Numpad => "framework_numpad::kbd_backlight",
        ModuleCategory::Macropad => "framework_macropad::kbd_backlight",
        ModuleCategory::Other => "framework_aux::kbd_backlight",
    }
}

/// Which slice of the global target set a context claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextScope {
    All,
    Category(ModuleCategory),
}

/// A logical brightness group.
#[derive(Debug, Clone)]
pub struct Context {
    pub name: String,
    scope: ContextScope,
    members: Vec<Target>,
    /// Last level known to be on the hardware.
    pub level: Level,
}

impl Context {
    fn new(name: &str, scope: ContextScope, members: Vec<Target>) -> Self {
        Self {
            name: name.to_string(),
            scope,
            members,
            level: Level::Off,
        }
    }

    pub fn members(&self) -> &[Target] {
        &self.members
    }

    /// Replaces the membership wholesale, keeping discovery order.
    pub fn set_members(&mut self, members: Vec<Target>) {
        self.members = members;
    }

    /// The read-back reference module: first keyboard in discovery
    /// order, else the first member.
    pub fn master(&self) -> Option<&Target> {
        self.members
            .iter()
            .find(|t| t.category == ModuleCategory::Keyboard)
            .or_else(|| self.members.first())
    }

    /// This context's membership recomputed from a fresh global scan.
    pub fn select_from(&self, global: &[Target]) -> Vec<Target> {
        match self.scope {
            ContextScope::All => global.to_vec(),
            ContextScope::Category(category) => global
                .iter()
                .filter(|t| t.category == category)
                .cloned()
                .collect(),
        }
    }
}

/// Groups targets into contexts under the given mode.
///
/// Deterministic: the same target set in the same order always yields
/// the same contexts with the same membership. Categories with no
/// members yield no context.
pub fn partition(targets: &[Target], mode: Mode) -> Vec<Context> {
    match mode {
        Mode::Unified => vec![Context::new(
            UNIFIED_NAME,
            ContextScope::All,
            targets.to_vec(),
        )],
        Mode::Separate => {
            const ORDER: [ModuleCategory; 4] = [
                ModuleCategory::Keyboard,
                ModuleCategory::Numpad,
                ModuleCategory::Macropad,
                ModuleCategory::Other,
            ];
            ORDER
                .iter()
                .filter_map(|&category| {
                    let members: Vec<Target> = targets
                        .iter()
                        .filter(|t| t.category == category)
                        .cloned()
                        .collect();
                    if members.is_empty() {
                        None
                    } else {
                        Some(Context::new(
                            category_name(category),
                            ContextScope::Category(category),
                            members,
                        ))
                    }
                })
                .collect()
        }
    }
}
