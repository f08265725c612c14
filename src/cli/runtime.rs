use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Runtime CLI for the troubleshooting loop and one-shot checks.
#[derive(Parser, Debug)]
#[command(name = "medic")]
#[command(version)]
#[command(
    about = "Self-healing host and service monitor",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory (reads default.toml, then $MEDIC_ENV)
    #[arg(short, long, default_value = "config", env = "MEDIC_CONFIG_DIR")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the monitoring loop until Ctrl+C or the duration elapses
    Run {
        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
        /// Seconds between ticks
        #[arg(short, long)]
        interval: Option<u64>,
        /// Detect and guide only, never remediate
        #[arg(long)]
        dry_run: bool,
        /// Write the final report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Probe every configured service once
    Check {
        #[arg(long)]
        json: bool,
    },

    /// Run detection once without recovery
    Detect {
        #[arg(long)]
        json: bool,
    },

    /// Print the troubleshooting playbook for a failure type
    Guide {
        /// e.g. high_cpu, disk_full, service_down
        failure_type: String,
    },

    /// Print the effective configuration
    Config,
}
