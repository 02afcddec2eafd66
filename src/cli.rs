use clap::Parser;
use std::path::PathBuf;

/// fleetmirrord — daemon mirroring a cloud appliance fleet into the host
/// accessory runtime
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path (default: standard locations)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Detach from the terminal and run as a daemon
    #[arg(short = 'd', long = "daemonize", default_value = "false")]
    pub daemonize: bool,
}
