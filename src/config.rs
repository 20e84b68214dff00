//! Configuration management for the fw_backlightd daemon.
//!
//! Handles loading, parsing, and validation of the YAML configuration
//! file. Unlike most daemons, a missing file is not an error: the
//! built-in defaults describe a stock FW16 and the daemon runs fine with
//! no configuration at all.

use anyhow::{Context as _, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::RwLock;

use crate::context::Mode;
use crate::target::{self, ModuleSpec};

/// Main configuration structure for the fw_backlightd daemon.
///
/// Deserialized from the YAML configuration file; every field has a
/// default matching a stock FW16.
///
/// # Example
///
/// ```yaml
/// version: 1
/// vendor_ids: [0x32ac]
/// mode: unified
/// max_brightness: 100
/// debounce_ms: 180
/// poll_seconds: 3
///
/// manual_targets:
///   - "32ac:0019"
///
/// modules:
///   - pid: 0x0021
///     category: keyboard
///     label: "prototype keyboard"
///
/// transport:
///   kind: helper
///   program: /usr/bin/qmk_hid
///
/// notifiers:
///   - command: notify-send
///     args: ["Keyboard backlight", "level {level} ({percent}%)"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    #[serde(default = "defaults::version")]
    pub version: u8,

    /// Vendor ids probed during discovery.
    #[serde(default = "defaults::vendor_ids")]
    pub vendor_ids: Vec<u16>,

    /// Context grouping policy.
    #[serde(default)]
    pub mode: Mode,

    /// Max raw scale of every virtual backlight device.
    #[serde(default = "defaults::max_brightness")]
    pub max_brightness: u32,

    /// Quiet period between the last slider event and the hardware write.
    #[serde(default = "defaults::debounce_ms")]
    pub debounce_ms: u64,

    /// Hardware read-back interval; 0 disables polling.
    #[serde(default)]
    pub poll_seconds: u64,

    /// Bound on every single hardware transport call.
    #[serde(default = "defaults::io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// Explicit `vid:pid` targets included without presence probing.
    #[serde(default)]
    pub manual_targets: Vec<String>,

    /// Module catalog extensions and overrides, by product id.
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,

    /// Which hardware transport moves the bytes.
    #[serde(default)]
    pub transport: TransportCfg,

    /// Session consumers told about hardware-driven level changes.
    #[serde(default)]
    pub notifiers: Vec<NotifierCfg>,
}

/// Hardware transport selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TransportCfg {
    /// Shell out to the qmk_hid helper per call.
    Helper {
        #[serde(default = "defaults::helper_program")]
        program: PathBuf,
    },
    /// Speak the VIA protocol over hidraw directly.
    Raw,
}

impl Default for TransportCfg {
    fn default() -> Self {
        TransportCfg::Helper {
            program: defaults::helper_program(),
        }
    }
}

/// One fire-and-forget notification consumer.
///
/// `{level}` and `{percent}` placeholders in args are substituted per
/// dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierCfg {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

mod defaults {
    use std::path::PathBuf;

    pub fn version() -> u8 {
        1
    }

    /// Framework Computer's USB vendor id.
    pub fn vendor_ids() -> Vec<u16> {
        vec![0x32ac]
    }

    pub fn max_brightness() -> u32 {
        100
    }

    pub fn debounce_ms() -> u64 {
        180
    }

    pub fn io_timeout_ms() -> u64 {
        400
    }

    pub fn helper_program() -> PathBuf {
        PathBuf::from("/usr/bin/qmk_hid")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: defaults::version(),
            vendor_ids: defaults::vendor_ids(),
            mode: Mode::default(),
            max_brightness: defaults::max_brightness(),
            debounce_ms: defaults::debounce_ms(),
            poll_seconds: 0,
            io_timeout_ms: defaults::io_timeout_ms(),
            manual_targets: Vec::new(),
            modules: Vec::new(),
            transport: TransportCfg::default(),
            notifiers: Vec::new(),
        }
    }
}

impl Config {
    /// Validates the configuration for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.max_brightness == 0 {
            anyhow::bail!("max_brightness must be greater than zero");
        }
        if self.vendor_ids.is_empty() && self.manual_targets.is_empty() {
            anyhow::bail!("no vendor_ids and no manual_targets; nothing to discover");
        }
        for spec in &self.manual_targets {
            target::parse_manual(spec)?;
        }
        let mut seen = std::collections::HashSet::new();
        for module in &self.modules {
            if !seen.insert(module.pid) {
                anyhow::bail!("duplicate module entry for pid {:#06x}", module.pid);
            }
        }
        for notifier in &self.notifiers {
            if notifier.command.is_empty() {
                anyhow::bail!("notifier with empty command");
            }
        }
        Ok(())
    }

    /// Parsed manual target identities.
    pub fn manual_identities(&self) -> Result<Vec<(u16, u16)>> {
        self.manual_targets
            .iter()
            .map(|spec| target::parse_manual(spec))
            .collect()
    }
}

/// Runtime overrides taken from the command line, applied on top of the
/// loaded file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub mode: Option<Mode>,
    pub vendor_id: Option<u16>,
    pub debounce_ms: Option<u64>,
    pub max_brightness: Option<u32>,
}

fn locate_config() -> Option<PathBuf> {
    if let Ok(env_path) = env::var("FW_BACKLIGHTD_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("fw_backlightd/config.yml");
        if cfg_dir.exists() {
            return Some(cfg_dir);
        }
    }

    let etc = Path::new("/etc/fw_backlightd/config.yml");
    if etc.exists() {
        return Some(etc.to_path_buf());
    }

    None
}

/// Configuration manager owning the config data and its file path.
///
/// # Example
///
/// ```no_run
/// use fw_backlightd::config::ConfigManager;
/// use std::path::PathBuf;
///
/// # async fn example() -> anyhow::Result<()> {
/// // Load from a specific path
/// let config_manager = ConfigManager::load(Some(PathBuf::from("config.yml"))).await?;
///
/// // Or from standard locations, falling back to built-in defaults
/// let config_manager = ConfigManager::load(None).await?;
///
/// let debounce = config_manager.get().await.debounce_ms;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Config>>,
    path: PathBuf,
}

#[allow(dead_code)]
impl ConfigManager {
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            path,
        }
    }

    /// Loads configuration from a file or standard locations.
    ///
    /// Search order: explicit path, `FW_BACKLIGHTD_CONFIG`,
    /// `$XDG_CONFIG_HOME/fw_backlightd/config.yml`,
    /// `/etc/fw_backlightd/config.yml`. With nothing found the built-in
    /// defaults apply; the daemon is usable with zero configuration.
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => match locate_config() {
                Some(p) => p,
                None => {
                    info!("no config file found; using built-in defaults");
                    return Ok(Self::new(
                        Config::default(),
                        PathBuf::from("/etc/fw_backlightd/config.yml"),
                    ));
                }
            },
        };

        info!("loading config from {}", config_path.display());
        let config = Self::load_config_from_path(&config_path).await?;

        Ok(Self::new(config, config_path))
    }

    /// Gets a read-only reference to the current configuration.
    pub async fn get(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config.read().await
    }

    /// Returns the path to the configuration file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reloads configuration from the same file.
    pub async fn reload(&self) -> Result<()> {
        info!("reloading config from {}", self.path.display());
        let new_config = Self::load_config_from_path(&self.path).await?;
        *self.config.write().await = new_config;
        Ok(())
    }

    /// Saves the current configuration atomically.
    pub async fn save(&self) -> Result<()> {
        let config = self.config.read().await;
        let config_yaml =
            serde_yaml::to_string(&*config).context("failed to serialize configuration")?;

        let tmp_path = self.path.with_extension("yml.tmp");
        fs::write(&tmp_path, config_yaml)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to move config to {}", self.path.display()))?;

        info!("configuration saved to {}", self.path.display());
        Ok(())
    }

    /// Clones the current configuration snapshot.
    pub async fn clone_config(&self) -> Config {
        self.config.read().await.clone()
    }

    /// Applies command-line overrides on top of the loaded file.
    pub async fn apply_overrides(&self, overrides: &Overrides) -> Result<()> {
        let mut config = self.config.write().await;
        if let Some(mode) = overrides.mode {
            config.mode = mode;
        }
        if let Some(vid) = overrides.vendor_id {
            config.vendor_ids = vec![vid];
        }
        if let Some(debounce) = overrides.debounce_ms {
            config.debounce_ms = debounce;
        }
        if let Some(max) = overrides.max_brightness {
            config.max_brightness = max;
        }
        config.validate().context("overrides left config invalid")
    }

    async fn load_config_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse YAML in {}", path.display()))?;

        if config.version != 1 {
            anyhow::bail!(
                "unsupported config version {} in {}",
                config.version,
                path.display()
            );
        }

        config
            .validate()
            .with_context(|| format!("configuration validation failed for {}", path.display()))?;

        Ok(config)
    }
}
