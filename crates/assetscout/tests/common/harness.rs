//! Test harness for isolated engine runs.
//!
//! The `TestHarness` wires an [`Engine`] to a scripted task body and either
//! in-memory repositories or a SQLite file in a temporary directory.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;

use assetscout::broadcast::{JobProgressBroadcaster, JobProgressEvent, JobProgressKind};
use assetscout::db::Database;
use assetscout::engine::{Engine, EngineDeps};
use assetscout::model::{CompanyEntry, Job};
use assetscout::secrets::ConfiguredCredentials;
use assetscout::store::{
    AssetRepository, JobRepository, MemoryAssetRepository, MemoryJobRepository,
    SqliteAssetRepository, SqliteJobRepository,
};
use assetscout::worker::{RetryPolicy, TaskRunner};

use super::builders::ScriptedTask;

const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TestHarness {
    /// Keeps the SQLite file alive for the harness lifetime.
    temp_dir: Option<TempDir>,
    pub db_path: Option<PathBuf>,
    pub engine: Engine,
    pub jobs: Arc<dyn JobRepository>,
    pub assets: Arc<dyn AssetRepository>,
    pub task: Arc<ScriptedTask>,
    events: broadcast::Receiver<JobProgressEvent>,
}

impl TestHarness {
    /// In-memory repositories, one credential for `openai`.
    pub fn new(task: ScriptedTask) -> Self {
        Self::with_credentials(task, super::builders::credentials("openai", 1))
    }

    pub fn with_credentials(task: ScriptedTask, credentials: ConfiguredCredentials) -> Self {
        Self::build(
            task,
            credentials,
            Arc::new(MemoryJobRepository::new()),
            Arc::new(MemoryAssetRepository::new()),
            None,
        )
    }

    /// Repositories backed by a SQLite file in a temporary directory.
    pub fn with_sqlite(task: ScriptedTask) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("assetscout.db");
        let db = Database::open(&db_path).expect("Failed to open database");
        let mut harness = Self::build(
            task,
            super::builders::credentials("openai", 1),
            Arc::new(SqliteJobRepository::new(db.clone())),
            Arc::new(SqliteAssetRepository::new(db)),
            Some(temp_dir),
        );
        harness.db_path = Some(db_path);
        harness
    }

    fn build(
        task: ScriptedTask,
        credentials: ConfiguredCredentials,
        jobs: Arc<dyn JobRepository>,
        assets: Arc<dyn AssetRepository>,
        temp_dir: Option<TempDir>,
    ) -> Self {
        let task = Arc::new(task);
        let broadcaster = JobProgressBroadcaster::new(1024);
        let events = broadcaster.subscribe();
        let deps = EngineDeps {
            jobs: Arc::clone(&jobs),
            assets: Arc::clone(&assets),
            credentials: Arc::new(credentials),
            runner: TaskRunner::new(
                task.clone(),
                RetryPolicy::new(3, Duration::from_millis(1)),
            ),
            broadcaster,
        };
        Self {
            temp_dir,
            db_path: None,
            engine: Engine::new(deps, Duration::from_millis(5)),
            jobs,
            assets,
            task,
            events,
        }
    }

    /// Submits to the started engine and waits for the run to end.
    pub async fn run(
        &mut self,
        entries: Vec<CompanyEntry>,
        supplementary: Option<&str>,
    ) -> Job {
        self.engine.start().await.expect("Failed to start engine");
        let id = self
            .engine
            .submit(entries, "openai", supplementary)
            .await
            .expect("Failed to submit job");
        self.wait_done(&id).await
    }

    /// Waits for the `done` event of `job_id` and returns the stored job.
    pub async fn wait_done(&mut self, job_id: &str) -> Job {
        let events = &mut self.events;
        tokio::time::timeout(WAIT_TIMEOUT, async {
            loop {
                match events.recv().await {
                    Ok(event) if event.job_id == job_id && event.is_done() => break,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(e) => panic!("event stream closed: {}", e),
                }
            }
        })
        .await
        .expect("Timed out waiting for job to finish");

        self.job(job_id).await
    }

    /// Events received so far for `job_id`, without waiting.
    pub fn drain_events(&mut self, job_id: &str) -> Vec<JobProgressKind> {
        std::iter::from_fn(|| self.events.try_recv().ok())
            .filter(|e| e.job_id == job_id)
            .map(|e| e.kind)
            .collect()
    }

    /// Polls until `condition` holds.
    pub async fn wait_until<F: Fn(&ScriptedTask) -> bool>(&self, condition: F) {
        tokio::time::timeout(WAIT_TIMEOUT, async {
            while !condition(&self.task) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("Timed out waiting for condition");
    }

    /// Waits until the dispatcher has released `job_id`.
    pub async fn wait_released(&self, job_id: &str) {
        tokio::time::timeout(WAIT_TIMEOUT, async {
            while self.engine.is_processing(job_id) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("Timed out waiting for job release");
    }

    pub async fn job(&self, job_id: &str) -> Job {
        self.engine
            .get(job_id)
            .await
            .expect("Failed to read job")
            .expect("Job not found")
    }
}
