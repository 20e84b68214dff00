use std::fs::File;

use anyhow::{Result, anyhow};
use clap::Parser;
use daemonize::Daemonize;
use log::LevelFilter;
use syslog::{BasicLogger, Facility, Formatter3164};

use fw_backlightd::{application::Application, cli::Cli, config::ConfigManager};

// FW_BACKLIGHTD_DEBUG: 0 quiet, 1 info, 2+ verbose.
fn log_level() -> LevelFilter {
    let level = std::env::var("FW_BACKLIGHTD_DEBUG")
        .ok()
        .and_then(|v| v.parse::<u8>().ok())
        .unwrap_or(0);
    match level {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

fn init_log() -> Result<()> {
    syslog::unix(Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: "fw_backlightd".into(),
        pid: 0,
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|_| log::set_max_level(log_level()))
            .map_err(|e| anyhow!("{e}"))
    })
}

fn into_daemon() -> Result<()> {
    File::create("/var/tmp/fw_backlightd.log")
        .and_then(|out| Ok((out.try_clone()?, out)))
        .map_err(|e| anyhow!("{e}"))
        .and_then(|(stderr, stdout)| {
            Daemonize::new()
                .stdout(stdout)
                .stderr(stderr)
                .start()
                .map_err(|e| anyhow!("{e}"))
        })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_log()?;

    // Fork before the runtime exists; tokio threads do not survive it.
    if cli.daemonize {
        into_daemon()?;
    }

    run(cli)
}

#[tokio::main]
async fn run(cli: Cli) -> Result<()> {
    let config_manager = ConfigManager::load(cli.config.clone()).await?;
    config_manager.apply_overrides(&cli.overrides()).await?;

    Application::builder()
        .with_config_manager(config_manager)
        .build()
        .await?
        .run()
        .await
}
