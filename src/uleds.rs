//! Userspace LED devices: one virtual brightness control per context.
//!
//! Each context registers one LED through the kernel uleds module. The
//! LED's sysfs brightness file is what UPower and the desktop write to;
//! every external write surfaces as one readable raw value on the
//! `/dev/uleds` fd. The daemon also writes that sysfs file itself
//! (a "mirror push") when hardware changes out from under the desktop,
//! and absorbs the resulting echo event in the engine.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engine::LedEvent;
use crate::error::BridgeError;

const ULEDS_DEV: &str = "/dev/uleds";
const ULEDS_NAME_LEN: usize = 64;

/// The per-context virtual brightness control, as the engine sees it.
#[async_trait]
pub trait VirtualBacklight: Send + Sync {
    fn name(&self) -> &str;

    fn max_raw(&self) -> u32;

    /// Pushes a hardware-driven raw value into the sysfs mirror so
    /// session indicators follow along.
    async fn push_raw(&self, raw: u32) -> io::Result<()>;
}

/// A registered uleds LED. Dropping it unregisters the LED.
pub struct UledsBacklight {
    name: String,
    max: u32,
    fd: AsyncFd<File>,
    mirror: PathBuf,
}

impl UledsBacklight {
    /// Registers a new LED with the kernel.
    ///
    /// Failure means this context cannot exist; the caller decides
    /// whether losing it is fatal for the whole process.
    pub fn create(name: &str, max: u32) -> Result<Self, BridgeError> {
        Self::try_create(name, max).map_err(|source| BridgeError::DeviceUnavailable {
            name: name.to_string(),
            source,
        })
    }

    fn try_create(name: &str, max: u32) -> io::Result<Self> {
        if name.len() >= ULEDS_NAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("LED name `{name}` exceeds {} bytes", ULEDS_NAME_LEN - 1),
            ));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(ULEDS_DEV)?;

        // Registration record: NUL-padded name followed by max_brightness.
        let mut record = [0u8; ULEDS_NAME_LEN + 4];
        record[..name.len()].copy_from_slice(name.as_bytes());
        record[ULEDS_NAME_LEN..].copy_from_slice(&max.to_ne_bytes());
        (&file).write_all(&record)?;

        Ok(Self {
            name: name.to_string(),
            max,
            fd: AsyncFd::new(file)?,
            mirror: PathBuf::from(format!("/sys/class/leds/{name}/brightness")),
        })
    }

    /// Waits for the next externally written brightness value.
    pub async fn next_raw(&self) -> io::Result<u32> {
        let mut buf = [0u8; 8];
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| (&*inner.get_ref()).read(&mut buf)) {
                Ok(Ok(0)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "uleds device closed",
                    ));
                }
                Ok(Ok(n)) => return Ok(decode_raw(&buf[..n])),
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }
}

#[async_trait]
impl VirtualBacklight for UledsBacklight {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_raw(&self) -> u32 {
        self.max
    }

    async fn push_raw(&self, raw: u32) -> io::Result<()> {
        tokio::fs::write(&self.mirror, raw.to_string()).await
    }
}

/// Kernel read formats vary by transfer size; handle 1-, 4- and 8-byte
/// reads alike.
fn decode_raw(buf: &[u8]) -> u32 {
    match buf.len() {
        1 => u32::from(buf[0]),
        n if n >= 4 => u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]),
        _ => 0,
    }
}

/// Forwards brightness events from one LED into the engine's channel
/// until cancelled. A read error ends the reader; the context then only
/// follows hardware changes through the poll path.
pub async fn run_reader(
    backlight: Arc<UledsBacklight>,
    ctx: usize,
    tx: mpsc::Sender<LedEvent>,
    token: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            () = token.cancelled() => {
                debug!("reader for {} cancelled", backlight.name());
                return Ok(());
            }
            next = backlight.next_raw() => match next {
                Ok(raw) => {
                    if tx.send(LedEvent { ctx, raw }).await.is_err() {
                        return Ok(());
                    }
                }
                Err(e) => {
                    error!("reading {} failed: {e}", backlight.name());
                    return Err(e.into());
                }
            }
        }
    }
}
