use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{AssetRepository, JobRepository};
use crate::error::StoreError;
use crate::model::{normalize_name, Asset, Job, JobPatch};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex.lock().map_err(|_| StoreError::LockPoisoned)
}

/// Job repository held in process memory.
#[derive(Default)]
pub struct MemoryJobRepository {
    jobs: Mutex<HashMap<String, Job>>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn create(&self, job: &Job) -> Result<String, StoreError> {
        lock(&self.jobs)?.insert(job.id.clone(), job.clone());
        Ok(job.id.clone())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(lock(&self.jobs)?.get(id).cloned())
    }

    async fn update(&self, id: &str, patch: JobPatch) -> Result<Job, StoreError> {
        let mut jobs = lock(&self.jobs)?;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if !patch.permits(job.status) {
            return Err(StoreError::Conflict {
                id: id.to_string(),
                status: job.status,
            });
        }
        patch.apply(job);
        Ok(job.clone())
    }

    async fn list_all(&self) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = lock(&self.jobs)?.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }
}

/// Asset repository held in process memory.
#[derive(Default)]
pub struct MemoryAssetRepository {
    assets: Mutex<Vec<Asset>>,
}

impl MemoryAssetRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the repository, e.g. with assets found by an earlier run.
    pub fn with_assets(assets: Vec<Asset>) -> Self {
        Self {
            assets: Mutex::new(assets),
        }
    }

    pub fn len(&self) -> usize {
        self.assets.lock().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AssetRepository for MemoryAssetRepository {
    async fn assets_for(
        &self,
        company_name: &str,
        isin: Option<&str>,
    ) -> Result<Vec<Asset>, StoreError> {
        let isin = isin
            .map(|i| i.trim().to_uppercase())
            .filter(|i| !i.is_empty());
        let key = normalize_name(company_name);
        let assets = lock(&self.assets)?;
        Ok(assets
            .iter()
            .filter(|asset| match &isin {
                Some(isin) => asset
                    .isin
                    .as_deref()
                    .is_some_and(|i| i.trim().eq_ignore_ascii_case(isin)),
                None => normalize_name(&asset.company_name) == key,
            })
            .cloned()
            .collect())
    }

    async fn append(&self, assets: Vec<Asset>) -> Result<usize, StoreError> {
        let count = assets.len();
        lock(&self.assets)?.extend(assets);
        Ok(count)
    }
}
