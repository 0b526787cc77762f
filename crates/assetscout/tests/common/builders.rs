//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::json;
use tokio::sync::Semaphore;

use assetscout::discovery::{
    DiscoveryTask, PrimaryOutcome, SupplementaryOutcome, SupplementaryRequest,
};
use assetscout::model::{normalize_name, Asset, CompanyEntry, Usage};
use assetscout::secrets::{ConfiguredCredentials, CredentialRef};
use assetscout::{TaskError, TaskErrorKind};

/// Entries with just a name.
pub fn companies(names: &[&str]) -> Vec<CompanyEntry> {
    names.iter().map(|n| CompanyEntry::new(*n)).collect()
}

/// `count` direct-value credentials for `provider`.
pub fn credentials(provider: &str, count: usize) -> ConfiguredCredentials {
    ConfiguredCredentials::new().with_provider(provider, credential_refs(provider, count))
}

pub fn credential_refs(provider: &str, count: usize) -> Vec<CredentialRef> {
    (0..count)
        .map(|i| CredentialRef::direct(format!("{}-key-{}", provider, i)))
        .collect()
}

pub fn transient(message: &str) -> TaskError {
    TaskError::other(message)
}

pub fn permanent(message: &str) -> TaskError {
    TaskError::new(TaskErrorKind::Permanent, message)
}

/// Deterministic task body driven by per-company scripts.
///
/// Primary calls pop the company's scripted responses in order and succeed
/// with one asset once the script is exhausted. Supplementary calls return
/// the company's scripted candidates.
pub struct ScriptedTask {
    primary: Mutex<HashMap<String, VecDeque<Result<u32, TaskError>>>>,
    supplementary: Mutex<HashMap<String, Vec<Asset>>>,
    primary_calls: Mutex<HashMap<String, u32>>,
    supplementary_calls: Mutex<HashMap<String, u32>>,
    seen_existing: Mutex<HashMap<String, usize>>,
    credentials_seen: Mutex<Vec<Option<String>>>,
    review_credentials_seen: Mutex<Vec<Option<String>>>,
    total_primary: AtomicU32,
    reviews_in_flight: AtomicU32,
    peak_reviews: AtomicU32,
    delay: Duration,
    review_delay: Duration,
    /// Companies that wait for a permit before answering.
    gated: Vec<String>,
    gate: Arc<Semaphore>,
}

impl ScriptedTask {
    pub fn new() -> Self {
        Self {
            primary: Mutex::new(HashMap::new()),
            supplementary: Mutex::new(HashMap::new()),
            primary_calls: Mutex::new(HashMap::new()),
            supplementary_calls: Mutex::new(HashMap::new()),
            seen_existing: Mutex::new(HashMap::new()),
            credentials_seen: Mutex::new(Vec::new()),
            review_credentials_seen: Mutex::new(Vec::new()),
            total_primary: AtomicU32::new(0),
            reviews_in_flight: AtomicU32::new(0),
            peak_reviews: AtomicU32::new(0),
            delay: Duration::ZERO,
            review_delay: Duration::ZERO,
            gated: Vec::new(),
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Delay of every supplementary call.
    pub fn with_review_delay(mut self, delay: Duration) -> Self {
        self.review_delay = delay;
        self
    }

    pub fn respond(self, company: &str, responses: Vec<Result<u32, TaskError>>) -> Self {
        self.primary
            .lock()
            .unwrap()
            .insert(normalize_name(company), responses.into());
        self
    }

    pub fn suggest(self, company: &str, assets: Vec<Asset>) -> Self {
        self.supplementary
            .lock()
            .unwrap()
            .insert(normalize_name(company), assets);
        self
    }

    /// Holds primary calls for `company` until [`ScriptedTask::release`].
    pub fn gate(mut self, company: &str) -> Self {
        self.gated.push(normalize_name(company));
        self
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    pub fn primary_calls(&self, company: &str) -> u32 {
        *self
            .primary_calls
            .lock()
            .unwrap()
            .get(&normalize_name(company))
            .unwrap_or(&0)
    }

    pub fn total_primary_calls(&self) -> u32 {
        self.total_primary.load(Ordering::SeqCst)
    }

    pub fn supplementary_calls(&self, company: &str) -> u32 {
        *self
            .supplementary_calls
            .lock()
            .unwrap()
            .get(&normalize_name(company))
            .unwrap_or(&0)
    }

    pub fn total_supplementary_calls(&self) -> u32 {
        self.supplementary_calls.lock().unwrap().values().sum()
    }

    /// How many existing assets the last supplementary call for `company` saw.
    pub fn existing_seen(&self, company: &str) -> Option<usize> {
        self.seen_existing
            .lock()
            .unwrap()
            .get(&normalize_name(company))
            .copied()
    }

    pub fn credentials_seen(&self) -> Vec<Option<String>> {
        self.credentials_seen.lock().unwrap().clone()
    }

    pub fn review_credentials_seen(&self) -> Vec<Option<String>> {
        self.review_credentials_seen.lock().unwrap().clone()
    }

    /// Most supplementary calls that were in flight at the same time.
    pub fn peak_concurrent_reviews(&self) -> u32 {
        self.peak_reviews.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscoveryTask for ScriptedTask {
    async fn run_primary(
        &self,
        entry: &CompanyEntry,
        _provider: &str,
        credential: Option<&SecretString>,
    ) -> Result<PrimaryOutcome, TaskError> {
        use secrecy::ExposeSecret;

        let key = normalize_name(&entry.name);
        *self
            .primary_calls
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_insert(0) += 1;
        self.total_primary.fetch_add(1, Ordering::SeqCst);
        self.credentials_seen
            .lock()
            .unwrap()
            .push(credential.map(|c| c.expose_secret().to_string()));

        if self.gated.contains(&key) {
            let permit = self.gate.acquire().await.unwrap();
            permit.forget();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self
            .primary
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(|script| script.pop_front())
            .unwrap_or(Ok(1));
        next.map(|assets_found| PrimaryOutcome {
            assets_found,
            usage: Usage::new(100, 20, 0.01),
        })
    }

    async fn run_supplementary(
        &self,
        request: &SupplementaryRequest<'_>,
    ) -> Result<SupplementaryOutcome, TaskError> {
        use secrecy::ExposeSecret;

        let key = normalize_name(&request.company_name);
        *self
            .supplementary_calls
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_insert(0) += 1;
        self.seen_existing
            .lock()
            .unwrap()
            .insert(key.clone(), request.existing_assets.len());
        self.review_credentials_seen
            .lock()
            .unwrap()
            .push(request.credential.map(|c| c.expose_secret().to_string()));

        let in_flight = self.reviews_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_reviews.fetch_max(in_flight, Ordering::SeqCst);
        if !self.review_delay.is_zero() {
            tokio::time::sleep(self.review_delay).await;
        }
        self.reviews_in_flight.fetch_sub(1, Ordering::SeqCst);

        let additional_assets = self
            .supplementary
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default();
        Ok(SupplementaryOutcome {
            additional_assets,
            usage: Usage::new(10, 2, 0.001),
        })
    }
}

/// Builder for engine config JSON documents.
pub struct ConfigBuilder {
    database_path: Option<String>,
    max_attempts: u32,
    backoff_step_ms: u64,
    rescan_delay_ms: u64,
    providers: Vec<serde_json::Value>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            database_path: None,
            max_attempts: 3,
            backoff_step_ms: 1,
            rescan_delay_ms: 5,
            providers: Vec::new(),
        }
    }

    pub fn database_path(mut self, path: &str) -> Self {
        self.database_path = Some(path.to_string());
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn provider(mut self, id: &str, keys: &[&str]) -> Self {
        let credentials: Vec<_> = keys.iter().map(|k| json!({ "value": k })).collect();
        self.providers
            .push(json!({ "id": id, "credentials": credentials }));
        self
    }

    pub fn provider_from_env(mut self, id: &str, env_var: &str) -> Self {
        self.providers
            .push(json!({ "id": id, "credentials": [{ "envVar": env_var }] }));
        self
    }

    pub fn build_json(&self) -> String {
        let mut doc = json!({
            "version": "1.0",
            "retry": {
                "maxAttempts": self.max_attempts,
                "backoffStepMs": self.backoff_step_ms
            },
            "scheduler": { "rescanDelayMs": self.rescan_delay_ms },
            "providers": self.providers,
        });
        if let Some(path) = &self.database_path {
            doc["databasePath"] = json!(path);
        }
        serde_json::to_string_pretty(&doc).unwrap()
    }
}
