//! Command line overrides for the environment configuration.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Default)]
#[command(name = "trailerfin", version, about = "Keep backdrop trailer links fresh")]
pub struct CliOptions {
    /// Directory to scan (overrides SCAN_PATH)
    #[arg(long, value_name = "PATH")]
    pub dir: Option<PathBuf>,

    /// Keep running, polling the library at a fixed interval
    #[arg(long, conflicts_with = "schedule")]
    pub monitor: bool,

    /// Keep running, refreshing every few days
    #[arg(long)]
    pub schedule: bool,

    /// Days between scheduled passes (overrides SCHEDULE_DAYS)
    #[arg(long, value_name = "DAYS", requires = "schedule")]
    pub schedule_days: Option<u32>,

    /// Concurrent workers (overrides WORKERS)
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,
}
