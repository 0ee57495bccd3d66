//! Job bookkeeping: the shared status record, cancellation checks and progress.
//!
//! The pipeline never owns the job record. It re-reads the record through a
//! [`JobStore`] before each unit of work and writes progress fields back, but
//! it only ever moves the status from `Running` to `Completed` or `Failed`.
//! Whoever cancels a job owns the `Canceled` status.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{info, warn};

use ritus_types::{Job, JobId, JobStatus, ProjectId};

use crate::AlignError;

/// Externally owned job records, one per project.
pub trait JobStore: Send + Sync {
    /// Current record for the project, if any.
    fn snapshot(&self, project: ProjectId) -> Option<Job>;

    /// Apply `apply` to the project's record if it is still job `job`.
    ///
    /// Returns `false` when the record is gone or belongs to another job.
    fn update(&self, project: ProjectId, job: JobId, apply: &mut dyn FnMut(&mut Job)) -> bool;
}

/// In-process [`JobStore`].
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<ProjectId, Job>,
    next_id: AtomicU64,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any job for `project` with a fresh running one.
    ///
    /// The old record is overwritten, not canceled. Its pipeline stops at the
    /// next checkpoint because its job id no longer matches the record.
    pub fn start(&self, project: ProjectId, similarity_threshold: f64) -> Job {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut job = Job::new(id, similarity_threshold);
        job.status = JobStatus::Running;

        let mut entry = self.jobs.entry(project).or_insert_with(|| job.clone());
        if entry.id != id {
            if entry.status == JobStatus::Running {
                warn!("replacing running job {} for project {project}", entry.id);
            }
            *entry = job.clone();
        }
        job
    }

    /// Mark the project's job canceled unless it already ended.
    ///
    /// Returns the record as it stands afterwards, `None` when there is none.
    pub fn cancel(&self, project: ProjectId) -> Option<Job> {
        let mut entry = self.jobs.get_mut(&project)?;
        if !entry.status.is_terminal() {
            entry.status = JobStatus::Canceled;
            info!("canceled job {} for project {project}", entry.id);
        }
        Some(entry.clone())
    }

    /// Run `f` unless the project has a job that has not ended.
    ///
    /// The project's record stays locked while `f` runs, so no job can start
    /// in between. Returns `None` without running `f` when a job is active.
    pub fn with_idle_project<R>(&self, project: ProjectId, f: impl FnOnce() -> R) -> Option<R> {
        let entry = self.jobs.entry(project);
        if let Entry::Occupied(record) = &entry
            && !record.get().status.is_terminal()
        {
            return None;
        }
        let result = f();
        drop(entry);
        Some(result)
    }

    /// True while the project has a job that has not ended.
    pub fn is_active(&self, project: ProjectId) -> bool {
        self.jobs
            .get(&project)
            .is_some_and(|job| !job.status.is_terminal())
    }
}

impl JobStore for JobRegistry {
    fn snapshot(&self, project: ProjectId) -> Option<Job> {
        self.jobs.get(&project).map(|job| job.clone())
    }

    fn update(&self, project: ProjectId, job: JobId, apply: &mut dyn FnMut(&mut Job)) -> bool {
        match self.jobs.get_mut(&project) {
            Some(mut record) if record.id == job => {
                apply(&mut record);
                true
            }
            _ => false,
        }
    }
}

/// A sub-range of the overall progress percentage owned by one phase.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressBand {
    pub start: f64,
    pub end: f64,
}

impl ProgressBand {
    pub const fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Progress after `done` of `total` units.
    pub fn at(&self, done: usize, total: usize) -> f64 {
        if total == 0 {
            return self.end;
        }
        let fraction = (done as f64 / total as f64).min(1.0);
        self.start + fraction * (self.end - self.start)
    }

    /// The `index`-th of `count` equal slots, offset by one as the pass loop expects.
    pub fn pass_slot(&self, index: usize, count: usize) -> ProgressBand {
        let width = self.end - self.start;
        let slots = (count + 2) as f64;
        ProgressBand {
            start: self.start + width * (index + 1) as f64 / slots,
            end: self.start + width * (index + 2) as f64 / slots,
        }
    }
}

/// The pipeline's handle on its own job record.
pub struct JobController<'a> {
    store: &'a dyn JobStore,
    project: ProjectId,
    job: JobId,
    stride: usize,
}

impl<'a> JobController<'a> {
    pub fn new(store: &'a dyn JobStore, project: ProjectId, job: JobId) -> Self {
        Self {
            store,
            project,
            job,
            stride: 1,
        }
    }

    /// Report progress every `stride` units within a phase (and on the last unit).
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride.max(1);
        self
    }

    pub fn project(&self) -> ProjectId {
        self.project
    }

    pub fn job_id(&self) -> JobId {
        self.job
    }

    /// Re-read the record: running and still ours.
    pub fn is_running(&self) -> bool {
        self.store
            .snapshot(self.project)
            .is_some_and(|job| job.id == self.job && job.status == JobStatus::Running)
    }

    /// Gate before a unit of work.
    pub fn checkpoint(&self) -> Result<(), AlignError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(AlignError::Canceled)
        }
    }

    pub fn similarity_threshold(&self) -> Result<f64, AlignError> {
        self.store
            .snapshot(self.project)
            .filter(|job| job.id == self.job)
            .map(|job| job.similarity_threshold)
            .ok_or(AlignError::MissingJob(self.project))
    }

    pub fn set_progress(&self, progress: f64) {
        self.update(|job| job.progress = progress.clamp(0.0, 100.0));
    }

    pub fn set_total(&self, total: usize) {
        self.update(|job| job.total_units = total);
    }

    pub fn set_processed(&self, processed: usize) {
        self.update(|job| job.processed_units = processed);
    }

    /// Progress inside `band` after `done` of `total` units, throttled by the stride.
    pub fn advance(&self, band: ProgressBand, done: usize, total: usize) {
        if done % self.stride == 0 || done >= total {
            self.set_progress(band.at(done, total));
        }
    }

    /// Like [`advance`](Self::advance), also publishing `processed`.
    pub fn advance_with(&self, band: ProgressBand, done: usize, total: usize, processed: usize) {
        if done % self.stride == 0 || done >= total {
            self.update(|job| {
                job.progress = band.at(done, total).clamp(0.0, 100.0);
                job.processed_units = processed;
            });
        }
    }

    /// Run `commit` and mark the job completed, atomically with respect to
    /// other writers of the record, but only while the job is still running.
    ///
    /// Returns whether `commit` ran.
    pub fn complete_with(&self, commit: impl FnOnce()) -> bool {
        let mut commit = Some(commit);
        let mut committed = false;
        self.update(|job| {
            if job.status != JobStatus::Running {
                return;
            }
            if let Some(commit) = commit.take() {
                commit();
            }
            job.status = JobStatus::Completed;
            job.progress = 100.0;
            committed = true;
        });
        committed
    }

    pub fn complete(&self) -> bool {
        self.complete_with(|| {})
    }

    /// Record a failure unless someone else already ended the job.
    pub fn fail(&self, message: &str) {
        self.update(|job| {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Failed;
                job.error_message = Some(message.to_string());
            }
        });
    }

    fn update(&self, mut apply: impl FnMut(&mut Job)) -> bool {
        self.store.update(self.project, self.job, &mut apply)
    }
}
