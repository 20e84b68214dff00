//! Hardware transport: moving brightness to and from physical modules.
//!
//! Two interchangeable implementations of one capability. The helper
//! transport shells out to the `qmk_hid` CLI per call; the raw transport
//! talks the VIA custom-value protocol over hidraw itself. The engine
//! neither knows nor cares which one is wired in. Every call is bounded
//! by the configured I/O timeout.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hidapi::HidApi;
use tokio::process::Command;
use tokio::time::timeout;

#[cfg(test)]
use mockall::automock;

use crate::config::TransportCfg;
use crate::error::TransportError;
use crate::target::Target;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait HardwareTransport: Send + Sync {
    /// Writes a brightness percentage to one module.
    async fn apply(&self, target: &Target, pct: u8) -> Result<(), TransportError>;

    /// Reads the module's current brightness percentage.
    async fn read(&self, target: &Target) -> Result<u8, TransportError>;
}

/// Builds the configured transport implementation.
pub fn build(
    cfg: &TransportCfg,
    io_timeout: Duration,
) -> anyhow::Result<Arc<dyn HardwareTransport>> {
    Ok(match cfg {
        TransportCfg::Helper { program } => {
            Arc::new(HelperTransport::new(program.clone(), io_timeout))
        }
        TransportCfg::Raw => Arc::new(RawHidTransport::new(io_timeout)?),
    })
}

/* -------------------- helper-process transport -------------------- */

/// Transport backed by the external `qmk_hid` helper binary.
pub struct HelperTransport {
    program: PathBuf,
    io_timeout: Duration,
}

impl HelperTransport {
    pub fn new(program: PathBuf, io_timeout: Duration) -> Self {
        Self {
            program,
            io_timeout,
        }
    }

    fn set_args(target: &Target, pct: u8) -> Vec<String> {
        vec![
            "--vid".into(),
            format!("{:04x}", target.vid),
            "--pid".into(),
            format!("{:04x}", target.pid),
            "via".into(),
            "--backlight".into(),
            pct.to_string(),
        ]
    }

    fn get_args(target: &Target) -> Vec<String> {
        vec![
            "--vid".into(),
            format!("{:04x}", target.vid),
            "--pid".into(),
            format!("{:04x}", target.pid),
            "via".into(),
            "--get-backlight".into(),
        ]
    }
}

/// First integer token in the helper's stdout, clamped to a percentage.
fn parse_pct_output(stdout: &str) -> Option<u8> {
    stdout
        .split_whitespace()
        .find_map(|tok| tok.trim_matches(|c: char| !c.is_ascii_digit()).parse::<u16>().ok())
        .map(|v| v.min(100) as u8)
}

#[async_trait]
impl HardwareTransport for HelperTransport {
    async fn apply(&self, target: &Target, pct: u8) -> Result<(), TransportError> {
        let status = timeout(
            self.io_timeout,
            Command::new(&self.program)
                .args(Self::set_args(target, pct))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status(),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            op: "apply",
            target: target.to_string(),
            timeout: self.io_timeout,
        })?
        .map_err(|e| TransportError::ApplyFailed {
            target: target.to_string(),
            reason: format!("spawn {}: {e}", self.program.display()),
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(TransportError::ApplyFailed {
                target: target.to_string(),
                reason: format!("helper exited with {status}"),
            })
        }
    }

    async fn read(&self, target: &Target) -> Result<u8, TransportError> {
        let output = timeout(
            self.io_timeout,
            Command::new(&self.program)
                .args(Self::get_args(target))
                .stdin(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            op: "read",
            target: target.to_string(),
            timeout: self.io_timeout,
        })?
        .map_err(|e| TransportError::ReadFailed {
            target: target.to_string(),
            reason: format!("spawn {}: {e}", self.program.display()),
        })?;

        if !output.status.success() {
            return Err(TransportError::ReadFailed {
                target: target.to_string(),
                reason: format!("helper exited with {}", output.status),
            });
        }

        parse_pct_output(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            TransportError::ReadFailed {
                target: target.to_string(),
                reason: "no percentage in helper output".into(),
            }
        })
    }
}

/* -------------------- raw hidraw transport -------------------- */

// VIA custom-value commands used for the backlight channel.
const VIA_CUSTOM_SET_VALUE: u8 = 0x07;
const VIA_CUSTOM_GET_VALUE: u8 = 0x08;
const VIA_CHANNEL_BACKLIGHT: u8 = 0x01;
const VIA_FIELD_BRIGHTNESS: u8 = 0x01;
const VIA_REPORT_LEN: usize = 33; // report id + 32 payload bytes

fn pct_to_via(pct: u8) -> u8 {
    (u16::from(pct.min(100)) * 255 / 100) as u8
}

fn via_to_pct(raw: u8) -> u8 {
    (u16::from(raw) * 100 / 255) as u8
}

/// Transport speaking the VIA protocol directly over hidraw.
pub struct RawHidTransport {
    api: Arc<Mutex<HidApi>>,
    io_timeout: Duration,
}

impl RawHidTransport {
    pub fn new(io_timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            api: Arc::new(Mutex::new(HidApi::new()?)),
            io_timeout,
        })
    }

    fn open(api: &HidApi, target: &Target) -> Result<hidapi::HidDevice, String> {
        if let Some(node) = &target.node {
            if let Some(path) = node.to_str() {
                if let Ok(cpath) = std::ffi::CString::new(path) {
                    if let Ok(dev) = api.open_path(&cpath) {
                        return Ok(dev);
                    }
                }
            }
        }
        api.open(target.vid, target.pid).map_err(|e| e.to_string())
    }

    async fn round_trip<T, F>(
        &self,
        op: &'static str,
        target: &Target,
        call: F,
    ) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce(&HidApi, &Target) -> Result<T, String> + Send + 'static,
    {
        let api = self.api.clone();
        let owned = target.clone();
        let task = tokio::task::spawn_blocking(move || {
            let api = api.lock().map_err(|_| "hidapi lock poisoned".to_string())?;
            call(&api, &owned)
        });

        let result = timeout(self.io_timeout, task)
            .await
            .map_err(|_| TransportError::Timeout {
                op,
                target: target.to_string(),
                timeout: self.io_timeout,
            })?
            .map_err(|e| format!("blocking task failed: {e}"))
            .and_then(|inner| inner);

        result.map_err(|reason| match op {
            "apply" => TransportError::ApplyFailed {
                target: target.to_string(),
                reason,
            },
            _ => TransportError::ReadFailed {
                target: target.to_string(),
                reason,
            },
        })
    }
}

#[async_trait]
impl HardwareTransport for RawHidTransport {
    async fn apply(&self, target: &Target, pct: u8) -> Result<(), TransportError> {
        self.round_trip("apply", target, move |api, target| {
            let dev = RawHidTransport::open(api, target)?;
            let mut report = [0u8; VIA_REPORT_LEN];
            report[1] = VIA_CUSTOM_SET_VALUE;
            report[2] = VIA_CHANNEL_BACKLIGHT;
            report[3] = VIA_FIELD_BRIGHTNESS;
            report[4] = pct_to_via(pct);
            dev.write(&report).map_err(|e| e.to_string())?;
            Ok(())
        })
        .await
    }

    async fn read(&self, target: &Target) -> Result<u8, TransportError> {
        let wait_ms = self.io_timeout.as_millis() as i32;
        self.round_trip("read", target, move |api, target| {
            let dev = RawHidTransport::open(api, target)?;
            let mut report = [0u8; VIA_REPORT_LEN];
            report[1] = VIA_CUSTOM_GET_VALUE;
            report[2] = VIA_CHANNEL_BACKLIGHT;
            report[3] = VIA_FIELD_BRIGHTNESS;
            dev.write(&report).map_err(|e| e.to_string())?;

            let mut reply = [0u8; VIA_REPORT_LEN - 1];
            let n = dev
                .read_timeout(&mut reply, wait_ms)
                .map_err(|e| e.to_string())?;
            if n < 4 {
                return Err(format!("short VIA reply ({n} bytes)"));
            }
            // Reply echoes command, channel, field, then the value.
            Ok(via_to_pct(reply[3]))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::ModuleCategory;
    use pretty_assertions::assert_eq;

    fn target() -> Target {
        Target {
            vid: 0x32ac,
            pid: 0x0012,
            node: None,
            category: ModuleCategory::Keyboard,
        }
    }

    #[test]
    fn helper_set_args_match_the_cli_contract() {
        assert_eq!(
            HelperTransport::set_args(&target(), 35),
            vec!["--vid", "32ac", "--pid", "0012", "via", "--backlight", "35"]
        );
    }

    #[test]
    fn helper_get_args_match_the_cli_contract() {
        assert_eq!(
            HelperTransport::get_args(&target()),
            vec!["--vid", "32ac", "--pid", "0012", "via", "--get-backlight"]
        );
    }

    #[test]
    fn parses_bare_and_decorated_percentages() {
        assert_eq!(parse_pct_output("67\n"), Some(67));
        assert_eq!(parse_pct_output("backlight: 35%\n"), Some(35));
        assert_eq!(parse_pct_output("nothing here"), None);
        assert_eq!(parse_pct_output("999"), Some(100));
    }

    #[test]
    fn via_scaling_round_trips_canonical_percentages() {
        for pct in [0u8, 35, 67, 100] {
            let back = via_to_pct(pct_to_via(pct));
            // One point of quantization loss is fine; the level buckets
            // are far wider than that.
            assert!(back.abs_diff(pct) <= 1, "{pct} -> {back}");
        }
    }

    #[tokio::test]
    async fn helper_apply_reports_spawn_failure() {
        let transport = HelperTransport::new(
            PathBuf::from("/nonexistent/qmk_hid"),
            Duration::from_millis(200),
        );
        let err = transport.apply(&target(), 35).await.unwrap_err();
        assert!(matches!(err, TransportError::ApplyFailed { .. }));
    }

    #[tokio::test]
    async fn helper_read_reports_spawn_failure() {
        let transport = HelperTransport::new(
            PathBuf::from("/nonexistent/qmk_hid"),
            Duration::from_millis(200),
        );
        let err = transport.read(&target()).await.unwrap_err();
        assert!(matches!(err, TransportError::ReadFailed { .. }));
    }

    fn fake_helper(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join("qmk_hid");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn helper_apply_succeeds_on_zero_exit() {
        let dir = tempfile::TempDir::new().unwrap();
        let transport =
            HelperTransport::new(fake_helper(&dir, "exit 0"), Duration::from_secs(2));
        tokio_test::assert_ok!(transport.apply(&target(), 35).await);
    }

    #[tokio::test]
    async fn helper_apply_fails_on_nonzero_exit() {
        let dir = tempfile::TempDir::new().unwrap();
        let transport =
            HelperTransport::new(fake_helper(&dir, "exit 3"), Duration::from_secs(2));
        let err = transport.apply(&target(), 35).await.unwrap_err();
        assert!(matches!(err, TransportError::ApplyFailed { .. }));
    }

    #[tokio::test]
    async fn helper_read_parses_reported_percentage() {
        let dir = tempfile::TempDir::new().unwrap();
        let transport =
            HelperTransport::new(fake_helper(&dir, "echo 67"), Duration::from_secs(2));
        assert_eq!(transport.read(&target()).await.unwrap(), 67);
    }

    #[tokio::test]
    async fn helper_apply_times_out_on_a_hung_helper() {
        let dir = tempfile::TempDir::new().unwrap();
        let transport =
            HelperTransport::new(fake_helper(&dir, "sleep 5"), Duration::from_millis(50));
        let err = transport.apply(&target(), 35).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { op: "apply", .. }));
    }
}
