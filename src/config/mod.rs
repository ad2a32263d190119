//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::app_mode::RunMode;
use crate::cli::CliOptions;
use crate::services::logging::LogFormat;

/// Application configuration loaded from environment variables, with CLI overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Library root to scan
    pub scan_path: PathBuf,

    /// Reference file name written into each title's backdrops folder
    pub video_filename: String,

    /// Concurrent workers per pass
    pub workers: usize,

    /// Playback start offset in seconds
    pub video_start_time: u32,

    /// TMDB API key
    pub tmdb_api_key: Option<String>,

    /// TheTVDB API key
    pub tvdb_api_key: Option<String>,

    /// Directory holding links.json and ignored.json
    pub state_dir: PathBuf,

    /// Days between passes in schedule mode
    pub schedule_days: u32,

    /// Seconds between passes in monitor mode
    pub monitor_interval: Duration,

    /// Links expiring sooner than this are refetched
    pub link_safety_margin: Duration,

    pub log_format: LogFormat,

    pub mode: RunMode,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env(cli: &CliOptions) -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok(), cli)
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, cli: &CliOptions) -> Result<Self> {
        let scan_path = cli
            .dir
            .clone()
            .or_else(|| lookup("SCAN_PATH").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("/mnt/plex"));

        let workers = match cli.workers {
            Some(n) => n,
            None => parse_or(&lookup, "WORKERS", 4)?,
        };
        if workers == 0 {
            bail!("WORKERS must be at least 1");
        }

        let schedule_days = match cli.schedule_days {
            Some(days) => days,
            None => parse_or(&lookup, "SCHEDULE_DAYS", 7)?,
        };
        if schedule_days == 0 {
            bail!("SCHEDULE_DAYS must be at least 1");
        }

        let monitor_interval = Duration::from_secs(parse_or(&lookup, "MONITOR_INTERVAL_SECS", 900)?);
        let mode = RunMode::from_flags(cli.monitor, cli.schedule, monitor_interval, schedule_days);

        let log_format = match lookup("LOG_FORMAT") {
            Some(raw) => raw.parse().context("Invalid LOG_FORMAT")?,
            None => LogFormat::default(),
        };

        Ok(Self {
            scan_path,

            video_filename: lookup("VIDEO_FILENAME")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "trailer.strm".to_string()),

            workers,

            video_start_time: parse_or(&lookup, "VIDEO_START_TIME", 8)?,

            tmdb_api_key: non_empty(lookup("TMDB_API_KEY")),

            tvdb_api_key: non_empty(lookup("TVDB_API_KEY")),

            state_dir: lookup("STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),

            schedule_days,

            monitor_interval,

            link_safety_margin: Duration::from_secs(parse_or(
                &lookup,
                "LINK_SAFETY_MARGIN_SECS",
                300,
            )?),

            log_format,

            mode,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)], cli: &CliOptions) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned(), cli)
    }

    #[test]
    fn test_defaults() {
        let config = load(&[], &CliOptions::default()).unwrap();
        assert_eq!(config.scan_path, PathBuf::from("/mnt/plex"));
        assert_eq!(config.video_filename, "trailer.strm");
        assert_eq!(config.workers, 4);
        assert_eq!(config.video_start_time, 8);
        assert_eq!(config.state_dir, PathBuf::from("./data"));
        assert_eq!(config.link_safety_margin, Duration::from_secs(300));
        assert_eq!(config.tmdb_api_key, None);
        assert_eq!(config.mode, RunMode::Once);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_cli_overrides_env() {
        let cli = CliOptions {
            dir: Some(PathBuf::from("/srv/media")),
            workers: Some(8),
            schedule: true,
            schedule_days: Some(2),
            ..Default::default()
        };
        let config = load(
            &[("SCAN_PATH", "/mnt/other"), ("WORKERS", "2"), ("SCHEDULE_DAYS", "9")],
            &cli,
        )
        .unwrap();
        assert_eq!(config.scan_path, PathBuf::from("/srv/media"));
        assert_eq!(config.workers, 8);
        assert_eq!(config.mode.interval(), Some(Duration::from_secs(2 * 86_400)));
    }

    #[test]
    fn test_blank_keys_are_absent() {
        let config = load(&[("TMDB_API_KEY", "  "), ("TVDB_API_KEY", "abc")], &CliOptions::default())
            .unwrap();
        assert_eq!(config.tmdb_api_key, None);
        assert_eq!(config.tvdb_api_key.as_deref(), Some("abc"));
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        assert!(load(&[("WORKERS", "many")], &CliOptions::default()).is_err());
        assert!(load(&[("WORKERS", "0")], &CliOptions::default()).is_err());
        assert!(load(&[("LOG_FORMAT", "xml")], &CliOptions::default()).is_err());
    }
}
