//! The per-company task body, supplied by the host.
//!
//! Prompt construction, response parsing and normalization live behind
//! [`DiscoveryTask`]; the engine only schedules, retries and records.

use std::collections::HashSet;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::TaskError;
use crate::model::{Asset, CompanyEntry, Usage};

/// Result of the primary discovery of one company.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PrimaryOutcome {
    pub assets_found: u32,
    pub usage: Usage,
}

/// Input of the supplementary review of one company.
#[derive(Debug, Clone)]
pub struct SupplementaryRequest<'a> {
    pub company_name: String,
    pub isin: Option<String>,
    pub sector: Option<String>,
    /// Assets already recorded for the company.
    pub existing_assets: Vec<Asset>,
    pub provider: String,
    pub credential: Option<&'a SecretString>,
}

impl<'a> SupplementaryRequest<'a> {
    pub fn for_entry(
        entry: &CompanyEntry,
        existing_assets: Vec<Asset>,
        provider: &str,
        credential: Option<&'a SecretString>,
    ) -> Self {
        Self {
            company_name: entry.name.clone(),
            isin: entry.isin.clone(),
            sector: entry.sector.clone(),
            existing_assets,
            provider: provider.to_string(),
            credential,
        }
    }
}

/// Candidate assets proposed by the supplementary review.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SupplementaryOutcome {
    pub additional_assets: Vec<Asset>,
    pub usage: Usage,
}

#[async_trait]
pub trait DiscoveryTask: Send + Sync {
    /// Discovers and persists the assets of one company.
    async fn run_primary(
        &self,
        entry: &CompanyEntry,
        provider: &str,
        credential: Option<&SecretString>,
    ) -> Result<PrimaryOutcome, TaskError>;

    /// Proposes assets missing from `request.existing_assets`. The engine
    /// deduplicates and stores them.
    async fn run_supplementary(
        &self,
        request: &SupplementaryRequest<'_>,
    ) -> Result<SupplementaryOutcome, TaskError>;
}

/// Keeps the candidates that collide with neither an existing asset nor an
/// earlier candidate, by facility name or by `city|asset_type`.
pub fn merge_new_assets(existing: &[Asset], candidates: Vec<Asset>) -> Vec<Asset> {
    let mut facilities: HashSet<String> = existing.iter().map(Asset::facility_key).collect();
    let mut locations: HashSet<String> = existing.iter().filter_map(Asset::location_key).collect();

    candidates
        .into_iter()
        .filter(|asset| {
            let facility = asset.facility_key();
            if facility.is_empty() || facilities.contains(&facility) {
                return false;
            }
            let location = asset.location_key();
            if let Some(location) = &location {
                if locations.contains(location) {
                    return false;
                }
            }
            facilities.insert(facility);
            if let Some(location) = location {
                locations.insert(location);
            }
            true
        })
        .collect()
}
