//! How long the process keeps running.

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One pass, then exit
    Once,
    /// Continuous polling at a fixed interval
    Monitor { interval: Duration },
    /// Periodic batch, every few days
    Schedule { interval: Duration },
}

impl RunMode {
    pub fn from_flags(monitor: bool, schedule: bool, monitor_interval: Duration, schedule_days: u32) -> Self {
        if monitor {
            RunMode::Monitor {
                interval: monitor_interval,
            }
        } else if schedule {
            RunMode::Schedule {
                interval: Duration::from_secs(u64::from(schedule_days.max(1)) * 24 * 60 * 60),
            }
        } else {
            RunMode::Once
        }
    }

    /// Pause between passes; `None` for a single pass
    pub fn interval(&self) -> Option<Duration> {
        match self {
            RunMode::Once => None,
            RunMode::Monitor { interval } | RunMode::Schedule { interval } => Some(*interval),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Once => f.write_str("once"),
            RunMode::Monitor { .. } => f.write_str("monitor"),
            RunMode::Schedule { .. } => f.write_str("schedule"),
        }
    }
}
