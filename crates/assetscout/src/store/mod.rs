//! Repository seams used by the engine.
//!
//! `sqlite` persists through [`crate::db`]; `memory` keeps everything in
//! process and backs the tests.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{Asset, Job, JobPatch};

pub mod memory;
pub mod sqlite;

pub use memory::{MemoryAssetRepository, MemoryJobRepository};
pub use sqlite::{SqliteAssetRepository, SqliteJobRepository};

/// Durable storage of job records.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Stores a new job and returns its id.
    async fn create(&self, job: &Job) -> Result<String, StoreError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Applies `patch` and returns the updated job.
    ///
    /// Fails with [`StoreError::NotFound`] for an unknown id and with
    /// [`StoreError::Conflict`] when the patch's status guard rejects the
    /// stored status. `updated_at` always advances.
    async fn update(&self, id: &str, patch: JobPatch) -> Result<Job, StoreError>;

    /// Every job, oldest first.
    async fn list_all(&self) -> Result<Vec<Job>, StoreError>;
}

/// Storage of discovered assets.
#[async_trait]
pub trait AssetRepository: Send + Sync {
    /// Assets of a company, by ISIN when given, else by normalized name.
    async fn assets_for(
        &self,
        company_name: &str,
        isin: Option<&str>,
    ) -> Result<Vec<Asset>, StoreError>;

    /// Appends assets and returns how many were stored.
    async fn append(&self, assets: Vec<Asset>) -> Result<usize, StoreError>;
}
