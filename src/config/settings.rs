//! Runtime tuning sections

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Process supervision limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// A run that produces no output and does not exit for this long is killed
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,

    /// Time between SIGTERM and SIGKILL when cancelling
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Interval of elapsed-time progress ticks
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

fn default_inactivity_timeout_secs() -> u64 {
    600
}

fn default_grace_period_ms() -> u64 {
    5000
}

fn default_tick_interval_secs() -> u64 {
    15
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            grace_period_ms: default_grace_period_ms(),
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

impl SupervisorSettings {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs.max(1))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }
}

/// Progress event bus sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSettings {
    /// Events buffered per run before slow subscribers start skipping
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

fn default_bus_capacity() -> usize {
    crate::bus::DEFAULT_BUS_CAPACITY
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

/// Worktree placement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeSettings {
    /// Directory under each project root that holds branch worktrees
    #[serde(default = "default_worktrees_dir")]
    pub dir: PathBuf,
}

fn default_worktrees_dir() -> PathBuf {
    PathBuf::from(".worktrees")
}

impl Default for WorktreeSettings {
    fn default() -> Self {
        Self {
            dir: default_worktrees_dir(),
        }
    }
}
