//! Job state and progress snapshots.

use std::fmt;
use std::time::Duration;

/// Lifecycle of a bulk cache job.
///
/// `Pending -> Running -> {Completed, Cancelled, Failed}`. The three terminal
/// states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    Running,
    /// Every dispatched fetch produced a result and no cancel was requested.
    Completed,
    Cancelled,
    /// A job-level fault, such as an unwritable store.
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time counters of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobProgress {
    /// Tiles in the full region enumeration.
    pub total_tiles: u64,
    /// Tiles with a result, including skipped and failed ones.
    pub completed_tiles: u64,
    /// Tiles whose fetch failed permanently.
    pub failed_tiles: u64,
    /// Tiles already cached and not re-downloaded.
    pub skipped_tiles: u64,
}

impl JobProgress {
    /// Tiles fetched and stored by this job.
    pub fn downloaded_tiles(&self) -> u64 {
        self.completed_tiles
            .saturating_sub(self.failed_tiles)
            .saturating_sub(self.skipped_tiles)
    }

    /// Progress as a ratio (0.0 to 1.0). An empty job counts as done.
    pub fn ratio(&self) -> f64 {
        if self.total_tiles == 0 {
            1.0
        } else {
            self.completed_tiles as f64 / self.total_tiles as f64
        }
    }

    pub fn percent(&self) -> f64 {
        self.ratio() * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.completed_tiles >= self.total_tiles
    }
}

/// Final outcome delivered to the completion observer.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub id: u64,
    pub state: JobState,
    pub progress: JobProgress,
    pub elapsed: Duration,
    /// Cause of a `Failed` job.
    pub error: Option<String>,
}

impl JobReport {
    pub fn total_tiles(&self) -> u64 {
        self.progress.total_tiles
    }

    pub fn completed_tiles(&self) -> u64 {
        self.progress.completed_tiles
    }

    pub fn failed_tiles(&self) -> u64 {
        self.progress.failed_tiles
    }

    pub fn skipped_tiles(&self) -> u64 {
        self.progress.skipped_tiles
    }
}
