//! Ordered job storage owned by the queue actor.

use std::sync::Arc;

use crate::jobs::{FilePayload, Job, JobId, JobStatus};

/// Partial update merged into a job; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub retry_count: Option<u32>,
    pub error: Option<Option<String>>,
    pub result_id: Option<Option<String>>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn error(mut self, error: Option<String>) -> Self {
        self.error = Some(error);
        self
    }

    pub fn result_id(mut self, result_id: Option<String>) -> Self {
        self.result_id = Some(result_id);
        self
    }
}

/// Insertion-ordered jobs; ids are unique.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: Vec<Job>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one `Queued` job per payload, returning their ids in order.
    pub fn add(&mut self, payloads: impl IntoIterator<Item = Arc<FilePayload>>) -> Vec<JobId> {
        let start = self.jobs.len();
        self.jobs.extend(payloads.into_iter().map(Job::new));
        self.jobs[start..].iter().map(|j| j.id).collect()
    }

    /// Merge `patch` into the job with `id`. Unknown ids are ignored.
    pub fn update(&mut self, id: JobId, patch: JobPatch) -> bool {
        let Some(job) = self.jobs.iter_mut().find(|j| j.id == id) else {
            return false;
        };
        if let Some(status) = patch.status {
            job.status = status;
        }
        if let Some(progress) = patch.progress {
            job.progress = progress.min(100);
        }
        if let Some(retry_count) = patch.retry_count {
            job.retry_count = retry_count;
        }
        if let Some(error) = patch.error {
            job.error = error;
        }
        if let Some(result_id) = patch.result_id {
            job.result_id = result_id;
        }
        true
    }

    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        let idx = self.jobs.iter().position(|j| j.id == id)?;
        Some(self.jobs.remove(idx))
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn all(&self) -> &[Job] {
        &self.jobs
    }

    pub fn by_status(&self, status: JobStatus) -> impl Iterator<Item = &Job> {
        self.jobs.iter().filter(move |j| j.status == status)
    }

    /// Drop every `Completed` job; returns how many were removed.
    pub fn clear_completed(&mut self) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|j| j.status != JobStatus::Completed);
        before - self.jobs.len()
    }
}
