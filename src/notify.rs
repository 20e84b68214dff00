//! Desktop session notification fan-out.
//!
//! Hardware-driven level changes are announced to zero or more session
//! consumers, each an external command spawned fire-and-forget. The
//! engine never waits on any of this; a hung consumer costs nothing but
//! a lingering child process.

use std::process::Stdio;

use log::debug;
use tokio::process::Command;

use crate::brightness::Level;
use crate::config::NotifierCfg;

/// Placeholder substitution for one consumer's argv.
fn render_args(cfg: &NotifierCfg, level: Level) -> Vec<String> {
    cfg.args
        .iter()
        .map(|arg| {
            arg.replace("{level}", &level.step().to_string())
                .replace("{percent}", &level.hw_pct().to_string())
        })
        .collect()
}

/// Spawns every configured consumer for the given level. Failures are
/// logged at debug and otherwise invisible.
pub fn dispatch(notifiers: &[NotifierCfg], level: Level) {
    for cfg in notifiers {
        let args = render_args(cfg, level);
        match Command::new(&cfg.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(mut child) => {
                // Reap in the background so the child never zombies.
                tokio::spawn(async move {
                    let _ = child.wait().await;
                });
            }
            Err(e) => debug!("notify: failed to spawn {}: {e}", cfg.command),
        }
    }
}
