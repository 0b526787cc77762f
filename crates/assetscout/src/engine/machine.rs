//! Drives one claimed job from `running` to its final status.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{error, info, warn};

use super::supplementary;
use super::EngineDeps;
use crate::error::{EngineError, StoreError};
use crate::model::{Job, JobPatch, JobStatus};
use crate::worker::{Accumulator, CancelCheck, PrimaryLane, ProgressWriter, WorkerPool};

/// Moves a `pending` job to `running`.
///
/// Returns `None` when another actor changed the status first.
pub async fn claim(deps: &EngineDeps, id: &str) -> Result<Option<Job>, EngineError> {
    let patch = JobPatch::status(JobStatus::Running).when_status(&[JobStatus::Pending]);
    match deps.jobs.update(id, patch).await {
        Ok(job) => Ok(Some(job)),
        Err(StoreError::Conflict { status, .. }) => {
            info!(job_id = id, %status, "job no longer pending, skipping");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Runs both phases of a claimed job and records the final status.
///
/// Persistence failures and lane panics mark the job `failed`. A job
/// cancelled mid-run keeps its `cancelled` status.
pub async fn run_job(
    deps: &EngineDeps,
    job: Job,
    cancel_flag: Arc<AtomicBool>,
) -> Result<JobStatus, EngineError> {
    let tracker = deps.broadcaster.for_job(&job.id);
    tracker.started();

    let accumulator = Arc::new(Accumulator::from_job(&job));
    let writer = ProgressWriter::spawn(
        Arc::clone(&deps.jobs),
        job.id.clone(),
        Arc::clone(&accumulator),
    );
    let cancel_check =
        CancelCheck::new(Arc::clone(&deps.jobs), job.id.clone()).with_flag(cancel_flag);

    let mut failure =
        primary_phase(deps, &job, &accumulator, &writer, &cancel_check, &tracker)
            .await
            .err();

    if failure.is_none() && !cancel_check.is_cancelled().await {
        let ctx = supplementary::PhaseContext {
            accumulator: Arc::clone(&accumulator),
            nudger: writer.nudger(),
            tracker: tracker.clone(),
            cancel_check: cancel_check.clone(),
        };
        if let Err(e) = supplementary::run_phase(deps, &job, ctx).await {
            failure = Some(e);
        }
    }

    if let Err(e) = writer.finish().await {
        failure.get_or_insert(e.into());
    }

    let status = finalize(deps, &job.id, failure).await?;
    tracker.done(accumulator.counts());
    Ok(status)
}

async fn primary_phase(
    deps: &EngineDeps,
    job: &Job,
    accumulator: &Arc<Accumulator>,
    writer: &ProgressWriter,
    cancel_check: &CancelCheck,
    tracker: &crate::broadcast::JobProgressTracker,
) -> Result<(), EngineError> {
    let remaining = job.remaining_entries();
    if remaining.is_empty() {
        info!(job_id = %job.id, "no remaining entries");
        return Ok(());
    }
    info!(
        job_id = %job.id,
        remaining = remaining.len(),
        recorded = job.results.len(),
        "starting primary phase"
    );

    let credentials = deps.credentials.parallel_credentials(&job.primary_provider);
    let lane = PrimaryLane {
        provider: job.primary_provider.clone(),
        runner: deps.runner.clone(),
        accumulator: Arc::clone(accumulator),
        nudger: writer.nudger(),
        tracker: tracker.clone(),
    };
    WorkerPool::new(credentials)
        .run(remaining, cancel_check.clone(), lane)
        .await?;
    Ok(())
}

async fn finalize(
    deps: &EngineDeps,
    id: &str,
    failure: Option<EngineError>,
) -> Result<JobStatus, EngineError> {
    let patch = match &failure {
        Some(e) => {
            error!(job_id = id, error = %e, "job failed");
            JobPatch::failed(e.to_string())
        }
        None => JobPatch::status(JobStatus::Complete).with_error(None),
    }
    .when_status(&[JobStatus::Running]);

    match deps.jobs.update(id, patch).await {
        Ok(job) => {
            info!(
                job_id = id,
                status = %job.status,
                completed = job.completed_companies,
                failed = job.failed_companies,
                "job finished"
            );
            Ok(job.status)
        }
        Err(StoreError::Conflict { status, .. }) => {
            info!(job_id = id, %status, "job left running before finalization");
            Ok(status)
        }
        Err(e) => {
            warn!(job_id = id, error = %e, "could not record final status");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::JobProgressBroadcaster;
    use crate::discovery::{
        DiscoveryTask, PrimaryOutcome, SupplementaryOutcome, SupplementaryRequest,
    };
    use crate::error::TaskError;
    use crate::model::{CompanyEntry, JobResult, Usage};
    use crate::secrets::ConfiguredCredentials;
    use crate::store::{JobRepository, MemoryAssetRepository, MemoryJobRepository};
    use crate::worker::{RetryPolicy, TaskRunner};
    use async_trait::async_trait;
    use secrecy::SecretString;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Counting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl DiscoveryTask for Counting {
        async fn run_primary(
            &self,
            _entry: &CompanyEntry,
            _provider: &str,
            _credential: Option<&SecretString>,
        ) -> Result<PrimaryOutcome, TaskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PrimaryOutcome {
                assets_found: 1,
                usage: Usage::new(2, 1, 0.0),
            })
        }

        async fn run_supplementary(
            &self,
            _request: &SupplementaryRequest<'_>,
        ) -> Result<SupplementaryOutcome, TaskError> {
            Ok(SupplementaryOutcome::default())
        }
    }

    fn deps(task: Arc<Counting>) -> (EngineDeps, Arc<MemoryJobRepository>) {
        let jobs = Arc::new(MemoryJobRepository::new());
        let deps = EngineDeps {
            jobs: jobs.clone(),
            assets: Arc::new(MemoryAssetRepository::new()),
            credentials: Arc::new(ConfiguredCredentials::new()),
            runner: TaskRunner::new(task, RetryPolicy::new(3, Duration::ZERO)),
            broadcaster: JobProgressBroadcaster::new(64),
        };
        (deps, jobs)
    }

    #[tokio::test]
    async fn test_claim_only_pending() {
        let task = Arc::new(Counting {
            calls: AtomicU32::new(0),
        });
        let (deps, jobs) = deps(task);
        let job = Job::new(vec![CompanyEntry::new("A")], "openai", None);
        jobs.create(&job).await.unwrap();

        let claimed = claim(&deps, &job.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Running);
        assert!(claim(&deps, &job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resumed_job_only_runs_remaining() {
        let task = Arc::new(Counting {
            calls: AtomicU32::new(0),
        });
        let (deps, jobs) = deps(task.clone());
        let mut job = Job::new(
            ["A", "B", "C", "D", "E"]
                .iter()
                .map(|n| CompanyEntry::new(*n))
                .collect(),
            "openai",
            None,
        );
        job.results = vec![
            JobResult::success(&job.entries[0], 3, Usage::default(), 0),
            JobResult::failed(&job.entries[1], "boom", 0),
        ];
        jobs.create(&job).await.unwrap();

        let claimed = claim(&deps, &job.id).await.unwrap().unwrap();
        let status = run_job(&deps, claimed, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        assert_eq!(status, JobStatus::Complete);
        assert_eq!(task.calls.load(Ordering::SeqCst), 3);
        let stored = jobs.get_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.results.len(), 5);
        assert_eq!(stored.completed_companies, 4);
        assert_eq!(stored.failed_companies, 1);
    }

    #[tokio::test]
    async fn test_cancelled_status_survives_finalize() {
        let task = Arc::new(Counting {
            calls: AtomicU32::new(0),
        });
        let (deps, jobs) = deps(task.clone());
        let job = Job::new(vec![CompanyEntry::new("A")], "openai", None);
        jobs.create(&job).await.unwrap();
        let claimed = claim(&deps, &job.id).await.unwrap().unwrap();
        jobs.update(&job.id, JobPatch::status(JobStatus::Cancelled))
            .await
            .unwrap();

        let status = run_job(&deps, claimed, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Cancelled);
        assert_eq!(task.calls.load(Ordering::SeqCst), 0);
    }
}
