use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::task::JoinSet;
use tracing::{debug, error, info, Instrument};

use super::progress::{Accumulator, CancelCheck, ProgressNudger};
use super::runner::TaskRunner;
use crate::broadcast::JobProgressTracker;
use crate::error::EngineError;
use crate::model::CompanyEntry;

/// Aggregate of one pool run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolOutcome {
    /// Entries that succeeded in this run.
    pub completed: u32,
    /// Entries that failed in this run.
    pub failed: u32,
    /// A lane stopped because the job was cancelled.
    pub cancelled: bool,
}

impl PoolOutcome {
    fn merge(&mut self, other: PoolOutcome) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.cancelled |= other.cancelled;
    }
}

/// The body a lane runs for every entry it claims.
#[async_trait]
pub trait LaneWork: Send + Sync + 'static {
    /// Returns whether the entry succeeded. An error stops every lane from
    /// claiming further entries and fails the pool run.
    async fn process(
        &self,
        worker_id: usize,
        credential: Option<&SecretString>,
        entry: &CompanyEntry,
    ) -> Result<bool, EngineError>;
}

/// Primary discovery: runs the task body and records the result.
#[derive(Clone)]
pub struct PrimaryLane {
    pub provider: String,
    pub runner: TaskRunner,
    pub accumulator: Arc<Accumulator>,
    pub nudger: ProgressNudger,
    pub tracker: JobProgressTracker,
}

#[async_trait]
impl LaneWork for PrimaryLane {
    async fn process(
        &self,
        worker_id: usize,
        credential: Option<&SecretString>,
        entry: &CompanyEntry,
    ) -> Result<bool, EngineError> {
        self.tracker.processing(&entry.name);
        let result = self
            .runner
            .run_primary(entry, &self.provider, credential, worker_id)
            .await;

        let success = result.is_success();
        let assets_found = result.assets_found.unwrap_or(0);
        let message = result.error.clone().unwrap_or_default();
        let counts = self.accumulator.record(entry, result);
        self.nudger.nudge();

        if success {
            self.tracker.completed(&entry.name, assets_found, counts);
        } else {
            self.tracker.error(&entry.name, &message, counts);
        }
        Ok(success)
    }
}

struct Shared<W> {
    entries: Vec<CompanyEntry>,
    cursor: AtomicUsize,
    cancel_check: CancelCheck,
    work: W,
    aborted: AtomicBool,
    failure: Mutex<Option<EngineError>>,
}

impl<W> Shared<W> {
    fn fail(&self, e: EngineError) {
        self.aborted.store(true, Ordering::SeqCst);
        let mut failure = self
            .failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        failure.get_or_insert(e);
    }

    fn take_failure(&self) -> Option<EngineError> {
        self.failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

/// Runs entries on parallel lanes, one per credential.
pub struct WorkerPool {
    lanes: Vec<Option<SecretString>>,
}

impl WorkerPool {
    /// Fewer than two credentials give a single lane, using the credential
    /// if there is one.
    pub fn new(credentials: Vec<SecretString>) -> Self {
        let lanes = if credentials.is_empty() {
            vec![None]
        } else {
            credentials.into_iter().map(Some).collect()
        };
        Self { lanes }
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Runs `work` once per entry, or until the job is cancelled.
    ///
    /// Lanes share one cursor over `entries` and check `cancel_check` before
    /// claiming the next entry, so a cancelled run still records its
    /// in-flight results.
    pub async fn run<W: LaneWork>(
        self,
        entries: Vec<CompanyEntry>,
        cancel_check: CancelCheck,
        work: W,
    ) -> Result<PoolOutcome, EngineError> {
        let lane_count = self.lanes.len();
        info!(entries = entries.len(), lanes = lane_count, "starting worker pool");

        let shared = Arc::new(Shared {
            entries,
            cursor: AtomicUsize::new(0),
            cancel_check,
            work,
            aborted: AtomicBool::new(false),
            failure: Mutex::new(None),
        });

        let mut lanes = JoinSet::new();
        for (worker_id, credential) in self.lanes.into_iter().enumerate() {
            let shared = Arc::clone(&shared);
            let span = tracing::info_span!("lane", worker_id);
            lanes.spawn(run_lane(worker_id, credential, shared).instrument(span));
        }

        let mut outcome = PoolOutcome::default();
        let mut panicked = Vec::new();
        while let Some(joined) = lanes.join_next().await {
            match joined {
                Ok(lane) => outcome.merge(lane),
                Err(e) => {
                    error!(error = %e, "worker lane aborted");
                    panicked.push(e.to_string());
                }
            }
        }

        if !panicked.is_empty() {
            return Err(EngineError::Lane(panicked.join("; ")));
        }
        if let Some(e) = shared.take_failure() {
            return Err(e);
        }

        info!(
            completed = outcome.completed,
            failed = outcome.failed,
            cancelled = outcome.cancelled,
            "worker pool finished"
        );
        Ok(outcome)
    }
}

async fn run_lane<W: LaneWork>(
    worker_id: usize,
    credential: Option<SecretString>,
    shared: Arc<Shared<W>>,
) -> PoolOutcome {
    let mut outcome = PoolOutcome::default();
    debug!(worker_id, "lane started");

    loop {
        if shared.aborted.load(Ordering::SeqCst) {
            break;
        }
        if shared.cancel_check.is_cancelled().await {
            debug!(worker_id, "job cancelled, lane stopping");
            outcome.cancelled = true;
            break;
        }

        let index = shared.cursor.fetch_add(1, Ordering::SeqCst);
        let Some(entry) = shared.entries.get(index) else {
            break;
        };

        match shared.work.process(worker_id, credential.as_ref(), entry).await {
            Ok(true) => outcome.completed += 1,
            Ok(false) => outcome.failed += 1,
            Err(e) => {
                error!(worker_id, company = %entry.name, error = %e, "lane stopped");
                shared.fail(e);
                break;
            }
        }
    }

    debug!(worker_id, "lane finished");
    outcome
}
