use std::fs::File;

use anyhow::{Result, anyhow};
use clap::Parser;
use daemonize::Daemonize;
use log::LevelFilter;
use syslog::{BasicLogger, Facility, Formatter3164};

use fleetmirrord::{application::Application, cli::Cli, config::ConfigManager};

fn init_log() -> Result<()> {
    syslog::unix(Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: "fleetmirrord".into(),
        pid: 0,
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|_| log::set_max_level(LevelFilter::Info))
            .map_err(|e| anyhow!("{e}"))
    })
}

fn into_daemon() -> Result<()> {
    File::create("/var/tmp/fleetmirrord.log")
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

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_log()?;
    if cli.daemonize {
        into_daemon()?;
    }

    let config_manager = ConfigManager::load(cli.config).await?;

    Application::builder()
        .with_config_manager(config_manager)
        .build()?
        .run()
        .await
}
