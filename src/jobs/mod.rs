//! Pass scheduling: once, monitor, or periodic batch

pub mod refresh;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::app_mode::RunMode;
use crate::services::scanner;

pub use refresh::{PassSummary, TrailerRefresher};

/// Drives refresh passes until the mode says stop or shutdown is requested
pub struct Scheduler {
    refresher: Arc<TrailerRefresher>,
    scan_root: PathBuf,
    mode: RunMode,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        refresher: Arc<TrailerRefresher>,
        scan_root: PathBuf,
        mode: RunMode,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            refresher,
            scan_root,
            mode,
            cancel,
        }
    }

    /// Run one pass over the scan root
    pub async fn run_pass(&self) -> Result<PassSummary> {
        let root = self.scan_root.clone();
        let units = tokio::task::spawn_blocking(move || scanner::scan(&root))
            .await
            .context("Library scan task failed")?;
        Ok(self.refresher.run_pass(units, &self.cancel).await)
    }

    /// Run passes according to the mode. Returns the summary of the last pass.
    pub async fn run(&self) -> Result<PassSummary> {
        let mut last = PassSummary::default();
        let mut pass = 0u64;

        info!(mode = %self.mode, root = %self.scan_root.display(), "Scheduler started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            pass += 1;
            if self.scan_root.is_dir() {
                info!(pass, "Starting pass");
                match self.run_pass().await {
                    Ok(summary) => last = summary,
                    Err(e) => error!(pass, error = %format!("{:#}", e), "Pass failed"),
                }
            } else {
                // Network mounts come and go; only startup treats this as fatal
                warn!(root = %self.scan_root.display(), "Scan root unavailable, skipping pass");
            }

            let Some(interval) = self.mode.interval() else {
                break;
            };

            info!(next_in_secs = interval.as_secs(), "Waiting for next pass");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!(passes = pass, "Scheduler stopped");
        Ok(last)
    }
}
