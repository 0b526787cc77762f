//! Shared per-run state and its persistence.
//!
//! Lanes record results into an [`Accumulator`] and nudge a single
//! [`ProgressWriter`] task. Nudges coalesce: while a write is in flight,
//! any number of further nudges collapse into one follow-up write of the
//! latest snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::StoreError;
use crate::model::{
    name_is_unique, CompanyEntry, Job, JobCounts, JobPatch, JobResult, JobStatus, Usage,
};
use crate::store::JobRepository;

/// Results of one job run. Counts and usage totals are derived from the
/// results, so they cannot drift apart.
#[derive(Debug)]
pub struct Accumulator {
    total: u32,
    entries: Vec<CompanyEntry>,
    results: Mutex<Vec<JobResult>>,
}

impl Accumulator {
    /// Seeds from the results already persisted on `job`.
    pub fn from_job(job: &Job) -> Self {
        Self {
            total: job.total_companies,
            entries: job.entries.clone(),
            results: Mutex::new(job.results.clone()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JobResult>> {
        // A panicking lane cannot leave a half-written Vec behind.
        self.results.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records the result for `entry`, replacing an earlier one, and
    /// returns the counts after the change.
    pub fn record(&self, entry: &CompanyEntry, result: JobResult) -> JobCounts {
        let bare_name = name_is_unique(&self.entries, entry);
        let mut results = self.lock();
        match results.iter().position(|r| r.belongs_to(entry, bare_name)) {
            Some(pos) => results[pos] = result,
            None => results.push(result),
        }
        counts_of(self.total, &results)
    }

    /// Mutates the result recorded for `entry`. Returns false if none exists.
    pub fn update_result<F>(&self, entry: &CompanyEntry, f: F) -> bool
    where
        F: FnOnce(&mut JobResult),
    {
        let bare_name = name_is_unique(&self.entries, entry);
        let mut results = self.lock();
        match results.iter_mut().find(|r| r.belongs_to(entry, bare_name)) {
            Some(result) => {
                f(result);
                true
            }
            None => false,
        }
    }

    pub fn counts(&self) -> JobCounts {
        counts_of(self.total, &self.lock())
    }

    pub fn results(&self) -> Vec<JobResult> {
        self.lock().clone()
    }

    /// Patch carrying the current results, counts and usage. Never touches
    /// the status.
    pub fn snapshot(&self) -> JobPatch {
        let results = self.lock();
        let counts = counts_of(self.total, &results);
        let mut usage = Usage::default();
        for result in results.iter() {
            usage += result.usage();
        }
        JobPatch {
            completed_companies: Some(counts.completed),
            failed_companies: Some(counts.failed),
            results: Some(results.clone()),
            usage: Some(usage),
            ..Default::default()
        }
    }
}

fn counts_of(total: u32, results: &[JobResult]) -> JobCounts {
    let completed = results.iter().filter(|r| r.is_success()).count() as u32;
    JobCounts {
        total,
        completed,
        failed: results.len() as u32 - completed,
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Nudge {
    version: u64,
    closing: bool,
}

/// Cheap handle lanes use to request a write.
#[derive(Clone)]
pub struct ProgressNudger {
    tx: Arc<watch::Sender<Nudge>>,
}

impl ProgressNudger {
    /// Requests a write of the latest snapshot. Never blocks.
    pub fn nudge(&self) {
        self.tx.send_modify(|n| n.version += 1);
    }
}

/// Single writer task persisting an [`Accumulator`] for one job.
pub struct ProgressWriter {
    nudger: ProgressNudger,
    handle: JoinHandle<Result<(), StoreError>>,
}

impl ProgressWriter {
    pub fn spawn(
        repo: Arc<dyn JobRepository>,
        job_id: String,
        accumulator: Arc<Accumulator>,
    ) -> Self {
        let (tx, mut rx) = watch::channel(Nudge::default());
        let handle = tokio::spawn(async move {
            let mut first_error = None;
            loop {
                if rx.changed().await.is_err() {
                    break;
                }
                let nudge = *rx.borrow_and_update();
                if let Err(e) = repo.update(&job_id, accumulator.snapshot()).await {
                    error!(job_id = %job_id, error = %e, "failed to persist progress");
                    first_error.get_or_insert(e);
                } else {
                    debug!(job_id = %job_id, version = nudge.version, "progress persisted");
                }
                if nudge.closing {
                    break;
                }
            }
            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        });

        Self {
            nudger: ProgressNudger { tx: Arc::new(tx) },
            handle,
        }
    }

    pub fn nudger(&self) -> ProgressNudger {
        self.nudger.clone()
    }

    /// Writes the final snapshot and stops the task. Returns the first
    /// persistence error seen during the run.
    pub async fn finish(self) -> Result<(), StoreError> {
        self.nudger.tx.send_modify(|n| {
            n.version += 1;
            n.closing = true;
        });
        self.handle
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

/// Cooperative cancellation check for one job.
///
/// Polls the persisted status; a local flag short-circuits once a
/// cancellation has been seen or requested in-process.
#[derive(Clone)]
pub struct CancelCheck {
    repo: Arc<dyn JobRepository>,
    job_id: String,
    cancelled: Arc<AtomicBool>,
}

impl CancelCheck {
    pub fn new(repo: Arc<dyn JobRepository>, job_id: impl Into<String>) -> Self {
        Self {
            repo,
            job_id: job_id.into(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares `flag` with the caller so it can cancel without a store read.
    pub fn with_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub async fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return true;
        }
        match self.repo.get_by_id(&self.job_id).await {
            Ok(Some(job)) if job.status == JobStatus::Cancelled => {
                self.cancel();
                true
            }
            Ok(Some(_)) => false,
            Ok(None) => {
                warn!(job_id = %self.job_id, "job disappeared, stopping");
                self.cancel();
                true
            }
            Err(e) => {
                // Keep working; the next poll may succeed.
                warn!(job_id = %self.job_id, error = %e, "cancellation check failed");
                false
            }
        }
    }
}
