//! Summary counts derived from the job list.

use crate::jobs::{Job, JobStatus};

/// Counts shown in the stats bar. `queued` includes jobs waiting out a
/// retry delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub total: usize,
    pub uploading: usize,
    pub completed: usize,
    pub failed: usize,
    pub queued: usize,
}

impl Stats {
    /// Project a job slice into counts.
    pub fn from_jobs(jobs: &[Job]) -> Self {
        jobs.iter().fold(
            Stats {
                total: jobs.len(),
                ..Stats::default()
            },
            |mut s, j| {
                match j.status {
                    JobStatus::Uploading => s.uploading += 1,
                    JobStatus::Completed => s.completed += 1,
                    JobStatus::Failed => s.failed += 1,
                    JobStatus::Queued | JobStatus::Retrying => s.queued += 1,
                }
                s
            },
        )
    }

    /// Jobs that still need work (queued, retrying or uploading).
    pub fn pending(&self) -> usize {
        self.queued + self.uploading
    }
}
