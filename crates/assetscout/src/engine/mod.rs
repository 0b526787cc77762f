//! Job orchestration: the control surface and the dispatcher behind it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::config::EngineConfig;
use crate::db::Database;
use crate::discovery::DiscoveryTask;
use crate::error::{EngineError, Result, StoreError};
use crate::model::{CompanyEntry, Job, JobPatch, JobStatus};
use crate::secrets::CredentialSource;
use crate::store::{AssetRepository, JobRepository, SqliteAssetRepository, SqliteJobRepository};
use crate::worker::{RetryPolicy, TaskRunner};

pub mod machine;
pub mod scheduler;
pub mod supplementary;

pub use scheduler::ActiveJobs;
use scheduler::Scheduler;

/// Collaborators shared by the dispatcher and the job state machine.
#[derive(Clone)]
pub struct EngineDeps {
    pub jobs: Arc<dyn JobRepository>,
    pub assets: Arc<dyn AssetRepository>,
    pub credentials: Arc<dyn CredentialSource>,
    pub runner: TaskRunner,
    pub broadcaster: JobProgressBroadcaster,
}

/// Background discovery engine.
///
/// Jobs are processed one at a time by a dispatcher started with
/// [`Engine::start`]; every other method only reads or patches stored
/// jobs and may be called whether or not the dispatcher runs.
pub struct Engine {
    deps: EngineDeps,
    active: ActiveJobs,
    rescan_delay: Duration,
    scheduler: Mutex<Option<Scheduler>>,
}

impl Engine {
    pub fn new(deps: EngineDeps, rescan_delay: Duration) -> Self {
        Self {
            deps,
            active: ActiveJobs::default(),
            rescan_delay,
            scheduler: Mutex::new(None),
        }
    }

    /// Engine persisting to the configured SQLite database, with
    /// credentials from the config's `providers` section.
    pub fn from_config(config: &EngineConfig, task: Arc<dyn DiscoveryTask>) -> Result<Self> {
        let path = config.database_path().ok_or_else(|| {
            crate::error::ConfigError::Validation {
                message: "no databasePath configured and no home directory found".to_string(),
            }
        })?;
        let db = Database::open(&path).map_err(StoreError::from)?;

        let deps = EngineDeps {
            jobs: Arc::new(SqliteJobRepository::new(db.clone())),
            assets: Arc::new(SqliteAssetRepository::new(db)),
            credentials: Arc::new(config.credentials()),
            runner: TaskRunner::new(task, RetryPolicy::from(&config.retry)),
            broadcaster: JobProgressBroadcaster::new(config.progress.channel_capacity),
        };
        Ok(Self::new(deps, config.scheduler.rescan_delay()))
    }

    /// Recovers jobs left `running` by a crashed process, then starts the
    /// dispatcher. Returns how many jobs were marked `interrupted`.
    ///
    /// Calling `start` on a started engine only kicks the dispatcher.
    pub async fn start(&self) -> Result<usize> {
        if self.is_started() {
            self.kick();
            return Ok(0);
        }

        let recovered = scheduler::recover_interrupted(&self.deps).await?;
        let scheduler = Scheduler::spawn(
            self.deps.clone(),
            self.active.clone(),
            self.rescan_delay,
        );
        scheduler.kick();

        let redundant = {
            let mut slot = self.scheduler.lock().map_err(|_| StoreError::LockPoisoned)?;
            if slot.is_some() {
                Some(scheduler)
            } else {
                *slot = Some(scheduler);
                None
            }
        };
        if let Some(scheduler) = redundant {
            // Lost a race with a concurrent `start`.
            scheduler.shutdown().await?;
            return Ok(recovered);
        }
        info!(recovered, "engine started");
        Ok(recovered)
    }

    /// Stops the dispatcher after the job it is processing, if any.
    pub async fn shutdown(&self) -> Result<()> {
        let scheduler = self
            .scheduler
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .take();
        match scheduler {
            Some(scheduler) => {
                scheduler.shutdown().await?;
                info!("engine stopped");
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn is_started(&self) -> bool {
        self.scheduler
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Whether the dispatcher is currently working on `id`. Stays true
    /// after the `done` event until the job's lanes have been released.
    pub fn is_processing(&self, id: &str) -> bool {
        self.active.is_active(id)
    }

    /// Stores a new `pending` job and wakes the dispatcher.
    ///
    /// Entries must have distinct identity keys.
    pub async fn submit(
        &self,
        entries: Vec<CompanyEntry>,
        primary_provider: &str,
        supplementary_provider: Option<&str>,
    ) -> Result<String> {
        if entries.is_empty() {
            return Err(EngineError::InvalidSubmission(
                "at least one company is required".to_string(),
            ));
        }
        if let Some(idx) = entries.iter().position(|e| e.name.trim().is_empty()) {
            return Err(EngineError::InvalidSubmission(format!(
                "entry #{} has an empty name",
                idx
            )));
        }
        let mut seen = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            if let Some(first) = seen.insert(entry.identity_key(), idx) {
                return Err(EngineError::InvalidSubmission(format!(
                    "entry #{} ({}) duplicates entry #{}",
                    idx,
                    entry.display_name(),
                    first
                )));
            }
        }
        if primary_provider.trim().is_empty() {
            return Err(EngineError::InvalidSubmission(
                "primary provider is required".to_string(),
            ));
        }

        let job = Job::new(
            entries,
            primary_provider,
            supplementary_provider
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        );
        let id = self.deps.jobs.create(&job).await?;
        info!(job_id = %id, companies = job.total_companies, "job submitted");
        self.kick();
        Ok(id)
    }

    /// Cancels a `pending` or `running` job. Returns false for any other status.
    ///
    /// A running job stops claiming entries; results already in flight are
    /// still recorded.
    pub async fn cancel(&self, id: &str) -> Result<bool> {
        let patch = JobPatch::status(JobStatus::Cancelled).when_status(JobStatus::CANCELLABLE);
        match self.guarded_update(id, patch).await? {
            Some(_) => {
                self.active.signal_cancel(id);
                info!(job_id = id, "job cancelled");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Re-queues an `interrupted`, `failed` or `cancelled` job. Only entries
    /// without a recorded result are run again.
    pub async fn resume(&self, id: &str) -> Result<bool> {
        if self.active.is_active(id) {
            // Cancelled but its lanes have not drained yet.
            warn!(job_id = id, "job still winding down, cannot resume yet");
            return Ok(false);
        }
        let patch = JobPatch::status(JobStatus::Pending)
            .with_error(None)
            .when_status(JobStatus::RESUMABLE);
        match self.guarded_update(id, patch).await? {
            Some(_) => {
                info!(job_id = id, "job resumed");
                self.kick();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.deps.jobs.get_by_id(id).await?)
    }

    /// Every job, oldest first.
    pub async fn list(&self) -> Result<Vec<Job>> {
        Ok(self.deps.jobs.list_all().await?)
    }

    /// Live progress of all jobs.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.deps.broadcaster.subscribe()
    }

    /// Wakes the dispatcher, if started.
    pub fn kick(&self) {
        if let Ok(slot) = self.scheduler.lock() {
            if let Some(scheduler) = slot.as_ref() {
                scheduler.kick();
            }
        }
    }

    async fn guarded_update(&self, id: &str, patch: JobPatch) -> Result<Option<Job>> {
        match self.deps.jobs.update(id, patch).await {
            Ok(job) => Ok(Some(job)),
            Err(StoreError::Conflict { .. }) => Ok(None),
            Err(StoreError::NotFound(_)) => Err(EngineError::JobNotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
