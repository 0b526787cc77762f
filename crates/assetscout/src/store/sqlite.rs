use async_trait::async_trait;

use super::{AssetRepository, JobRepository};
use crate::db::job_repo::{self, JobRow, PatchOutcome};
use crate::db::{asset_repo, Database};
use crate::error::StoreError;
use crate::model::{Asset, Job, JobPatch};

/// Runs a synchronous database call off the async executor.
async fn blocking<F, T>(db: &Database, f: F) -> Result<T, StoreError>
where
    F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
}

#[derive(Clone)]
pub struct SqliteJobRepository {
    db: Database,
}

impl SqliteJobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn create(&self, job: &Job) -> Result<String, StoreError> {
        let row = JobRow::from_job(job)?;
        blocking(&self.db, move |db| {
            job_repo::insert(db, &row)?;
            Ok(row.id)
        })
        .await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let id = id.to_string();
        blocking(&self.db, move |db| match job_repo::find_by_id(db, &id)? {
            Some(row) => Ok(Some(row.into_job()?)),
            None => Ok(None),
        })
        .await
    }

    async fn update(&self, id: &str, patch: JobPatch) -> Result<Job, StoreError> {
        let id = id.to_string();
        blocking(&self.db, move |db| {
            match job_repo::apply_patch(db, &id, &patch)? {
                PatchOutcome::Applied(job) => Ok(job),
                PatchOutcome::NotFound => Err(StoreError::NotFound(id)),
                PatchOutcome::Rejected(status) => Err(StoreError::Conflict { id, status }),
            }
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<Job>, StoreError> {
        blocking(&self.db, |db| {
            job_repo::list_all(db)?
                .into_iter()
                .map(|row| row.into_job().map_err(StoreError::from))
                .collect()
        })
        .await
    }
}

#[derive(Clone)]
pub struct SqliteAssetRepository {
    db: Database,
}

impl SqliteAssetRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AssetRepository for SqliteAssetRepository {
    async fn assets_for(
        &self,
        company_name: &str,
        isin: Option<&str>,
    ) -> Result<Vec<Asset>, StoreError> {
        let company_name = company_name.to_string();
        let isin = isin.map(str::to_string);
        blocking(&self.db, move |db| {
            Ok(asset_repo::find_for_company(
                db,
                &company_name,
                isin.as_deref(),
            )?)
        })
        .await
    }

    async fn append(&self, assets: Vec<Asset>) -> Result<usize, StoreError> {
        blocking(&self.db, move |db| Ok(asset_repo::insert_many(db, &assets)?)).await
    }
}
