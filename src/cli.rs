use clap::Parser;
use std::path::PathBuf;

use crate::config::Overrides;
use crate::context::Mode;

/// fw_backlightd: bridges the FW16 input-module backlights to one
/// virtual kbd_backlight control
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path (default: standard locations, then built-in defaults)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Detach and run as a daemon
    #[arg(short = 'd', long = "daemonize", default_value = "false")]
    pub daemonize: bool,

    /// Context grouping policy override
    #[arg(short = 'm', long = "mode", value_enum)]
    pub mode: Option<Mode>,

    /// Vendor id override, hex (e.g. 32ac)
    #[arg(short = 'v', long = "vid", value_parser = parse_hex_u16)]
    pub vid: Option<u16>,

    /// Debounce window override, milliseconds
    #[arg(long = "debounce-ms")]
    pub debounce_ms: Option<u64>,

    /// Virtual device max brightness override
    #[arg(short = 'b', long = "max-brightness")]
    pub max_brightness: Option<u32>,
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    u16::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            mode: self.mode,
            vendor_id: self.vid,
            debounce_ms: self.debounce_ms,
            max_brightness: self.max_brightness,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn vid_parses_hex_with_or_without_prefix() {
        assert_eq!(parse_hex_u16("32ac"), Ok(0x32ac));
        assert_eq!(parse_hex_u16("0x32ac"), Ok(0x32ac));
        assert!(parse_hex_u16("zzz").is_err());
    }

    #[test]
    fn flags_map_onto_overrides() {
        let cli = Cli::parse_from([
            "fw_backlightd",
            "--mode",
            "separate",
            "--vid",
            "32ac",
            "--debounce-ms",
            "90",
            "-b",
            "255",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.mode, Some(Mode::Separate));
        assert_eq!(overrides.vendor_id, Some(0x32ac));
        assert_eq!(overrides.debounce_ms, Some(90));
        assert_eq!(overrides.max_brightness, Some(255));
    }
}
