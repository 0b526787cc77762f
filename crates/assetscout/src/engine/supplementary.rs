//! Second pass over the entries whose primary discovery succeeded.
//!
//! Runs at most once per job: as soon as one result carries a
//! supplementary count, later runs of the same job skip the phase.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::{info, warn};

use super::EngineDeps;
use crate::broadcast::JobProgressTracker;
use crate::discovery::{merge_new_assets, SupplementaryRequest};
use crate::error::EngineError;
use crate::model::{name_is_unique, Asset, CompanyEntry, Job, Usage};
use crate::store::AssetRepository;
use crate::worker::{Accumulator, CancelCheck, LaneWork, ProgressNudger, TaskRunner, WorkerPool};

pub struct PhaseContext {
    pub accumulator: Arc<Accumulator>,
    pub nudger: ProgressNudger,
    pub tracker: JobProgressTracker,
    pub cancel_check: CancelCheck,
}

/// Whether the phase should run for `job` given the results recorded so far.
pub fn is_due(job: &Job, accumulator: &Accumulator) -> bool {
    job.supplementary_provider.is_some()
        && !accumulator
            .results()
            .iter()
            .any(|r| r.supplementary_assets_found.is_some())
}

/// Reviews every succeeded entry on a worker pool with one lane per
/// credential of the supplementary provider. A failed review records zero
/// new assets; only asset-store errors abort the phase.
pub async fn run_phase(
    deps: &EngineDeps,
    job: &Job,
    ctx: PhaseContext,
) -> Result<(), EngineError> {
    let Some(provider) = job.supplementary_provider.as_deref() else {
        return Ok(());
    };
    if !is_due(job, &ctx.accumulator) {
        info!(job_id = %job.id, "supplementary phase already ran");
        return Ok(());
    }

    let results = ctx.accumulator.results();
    let entries: Vec<CompanyEntry> = job
        .entries
        .iter()
        .filter(|entry| {
            let bare_name = name_is_unique(&job.entries, entry);
            results
                .iter()
                .any(|r| r.belongs_to(entry, bare_name) && r.is_success())
        })
        .cloned()
        .collect();
    if entries.is_empty() {
        return Ok(());
    }

    let credentials = deps.credentials.parallel_credentials(provider);
    info!(
        job_id = %job.id,
        provider,
        companies = entries.len(),
        lanes = credentials.len().max(1),
        "starting supplementary phase"
    );
    ctx.tracker.supplementary_started(entries.len() as u32);

    let lane = ReviewLane {
        provider: provider.to_string(),
        assets: Arc::clone(&deps.assets),
        runner: deps.runner.clone(),
        accumulator: ctx.accumulator,
        nudger: ctx.nudger,
        tracker: ctx.tracker,
    };
    let outcome = WorkerPool::new(credentials)
        .run(entries, ctx.cancel_check, lane)
        .await?;
    if outcome.cancelled {
        info!(job_id = %job.id, "supplementary phase cancelled");
    }
    Ok(())
}

/// Supplementary review of one company: asks for missing assets, stores
/// the new ones and adds the review to the company's result.
struct ReviewLane {
    provider: String,
    assets: Arc<dyn AssetRepository>,
    runner: TaskRunner,
    accumulator: Arc<Accumulator>,
    nudger: ProgressNudger,
    tracker: JobProgressTracker,
}

#[async_trait]
impl LaneWork for ReviewLane {
    async fn process(
        &self,
        _worker_id: usize,
        credential: Option<&SecretString>,
        entry: &CompanyEntry,
    ) -> Result<bool, EngineError> {
        let existing = self
            .assets
            .assets_for(&entry.name, entry.isin.as_deref())
            .await?;
        let request = SupplementaryRequest::for_entry(entry, existing, &self.provider, credential);

        let (stored, usage, reviewed) = match self.runner.run_supplementary(&request).await {
            Ok(outcome) => {
                let fresh = merge_new_assets(&request.existing_assets, outcome.additional_assets)
                    .into_iter()
                    .map(|asset| attribute(asset, entry))
                    .collect::<Vec<_>>();
                let stored = if fresh.is_empty() {
                    0
                } else {
                    self.assets.append(fresh).await?
                };
                (stored as u32, outcome.usage, true)
            }
            Err(e) => {
                warn!(company = %entry.name, error = %e, "supplementary review failed");
                (0, Usage::default(), false)
            }
        };

        let recorded = self
            .accumulator
            .update_result(entry, |result| result.add_supplementary(stored, usage));
        if !recorded {
            warn!(
                company = %entry.name,
                stored,
                "no primary result to attach the supplementary review to"
            );
        }
        self.nudger.nudge();
        self.tracker.supplementary_completed(&entry.name, stored);
        Ok(reviewed)
    }
}

/// Fills in the owning company where the task body left it out.
fn attribute(mut asset: Asset, entry: &CompanyEntry) -> Asset {
    if asset.company_name.trim().is_empty() {
        asset.company_name = entry.name.clone();
    }
    if asset.isin.is_none() {
        asset.isin = entry.isin.clone();
    }
    asset
}
