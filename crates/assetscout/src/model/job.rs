use std::ops::AddAssign;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::company::{name_is_unique, CompanyEntry};

/// Status of a discovery job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
    Interrupted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Interrupted => "interrupted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "complete" => Some(JobStatus::Complete),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            "interrupted" => Some(JobStatus::Interrupted),
            _ => None,
        }
    }

    /// Statuses `cancel` is accepted in.
    pub const CANCELLABLE: &'static [JobStatus] = &[JobStatus::Pending, JobStatus::Running];

    /// Statuses `resume` may move back to `pending`.
    pub const RESUMABLE: &'static [JobStatus] = &[
        JobStatus::Interrupted,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Allowed edges of the job state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Running) | (Pending, Cancelled) => true,
            (Running, Complete | Failed | Cancelled | Interrupted) => true,
            (Interrupted | Failed | Cancelled, Pending) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failed,
}

/// Token and cost usage reported by the task body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64, cost_usd: f64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cost_usd,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
        self.cost_usd += rhs.cost_usd;
    }
}

/// One entry's outcome within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isin: Option<String>,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets_found: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplementary_assets_found: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<usize>,
}

impl JobResult {
    pub fn success(entry: &CompanyEntry, assets_found: u32, usage: Usage, worker_id: usize) -> Self {
        Self {
            name: entry.name.clone(),
            isin: entry.isin.clone(),
            status: ResultStatus::Success,
            assets_found: Some(assets_found),
            supplementary_assets_found: None,
            error: None,
            input_tokens: Some(usage.input_tokens),
            output_tokens: Some(usage.output_tokens),
            cost_usd: Some(usage.cost_usd),
            worker_id: Some(worker_id),
        }
    }

    pub fn failed(entry: &CompanyEntry, error: impl Into<String>, worker_id: usize) -> Self {
        Self {
            name: entry.name.clone(),
            isin: entry.isin.clone(),
            status: ResultStatus::Failed,
            assets_found: None,
            supplementary_assets_found: None,
            error: Some(error.into()),
            input_tokens: None,
            output_tokens: None,
            cost_usd: None,
            worker_id: Some(worker_id),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    /// Usage recorded on this result; missing fields count as zero.
    pub fn usage(&self) -> Usage {
        Usage {
            input_tokens: self.input_tokens.unwrap_or(0),
            output_tokens: self.output_tokens.unwrap_or(0),
            cost_usd: self.cost_usd.unwrap_or(0.0),
        }
    }

    /// Records the supplementary review on a successful result.
    pub fn add_supplementary(&mut self, new_assets: u32, usage: Usage) {
        self.supplementary_assets_found = Some(new_assets);
        let mut total = self.usage();
        total += usage;
        self.input_tokens = Some(total.input_tokens);
        self.output_tokens = Some(total.output_tokens);
        self.cost_usd = Some(total.cost_usd);
    }

    /// Whether this result was recorded for `entry`. `bare_name` is false
    /// when another entry of the job shares the entry's name.
    pub fn belongs_to(&self, entry: &CompanyEntry, bare_name: bool) -> bool {
        entry.matches_with(&self.name, self.isin.as_deref(), bare_name)
    }
}

/// Aggregate counts carried by progress events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounts {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
}

/// A persisted discovery job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub primary_provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplementary_provider: Option<String>,
    pub total_companies: u32,
    pub completed_companies: u32,
    pub failed_companies: u32,
    pub entries: Vec<CompanyEntry>,
    #[serde(default)]
    pub results: Vec<JobResult>,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a new `pending` job.
    pub fn new(
        entries: Vec<CompanyEntry>,
        primary_provider: impl Into<String>,
        supplementary_provider: Option<String>,
    ) -> Self {
        let now = timestamp_now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            primary_provider: primary_provider.into(),
            supplementary_provider,
            total_companies: entries.len() as u32,
            completed_companies: 0,
            failed_companies: 0,
            entries,
            results: Vec::new(),
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cost_usd: 0.0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn counts(&self) -> JobCounts {
        JobCounts {
            total: self.total_companies,
            completed: self.completed_companies,
            failed: self.failed_companies,
        }
    }

    pub fn usage(&self) -> Usage {
        Usage::new(
            self.total_input_tokens,
            self.total_output_tokens,
            self.total_cost_usd,
        )
    }

    pub fn result_for(&self, entry: &CompanyEntry) -> Option<&JobResult> {
        let bare_name = name_is_unique(&self.entries, entry);
        self.results.iter().find(|r| r.belongs_to(entry, bare_name))
    }

    /// Entries that have no recorded result yet, in submission order.
    pub fn remaining_entries(&self) -> Vec<CompanyEntry> {
        self.entries
            .iter()
            .filter(|entry| self.result_for(entry).is_none())
            .cloned()
            .collect()
    }

    /// Entries whose primary result succeeded, in submission order.
    pub fn succeeded_entries(&self) -> Vec<CompanyEntry> {
        self.entries
            .iter()
            .filter(|entry| self.result_for(entry).is_some_and(JobResult::is_success))
            .cloned()
            .collect()
    }

    /// True once any result carries a supplementary count.
    pub fn supplementary_done(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.supplementary_assets_found.is_some())
    }

    /// A `running` job whose last write is older than `threshold`.
    pub fn is_stalled(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        match chrono::Duration::from_std(threshold) {
            Ok(threshold) => now - self.updated_at > threshold,
            Err(_) => false,
        }
    }

    /// Advances `updated_at`, strictly past its previous value.
    pub fn touch(&mut self) {
        let now = timestamp_now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + chrono::Duration::microseconds(1)
        };
    }
}

/// Current time truncated to microseconds, the precision persisted by the
/// database layer.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Partial update applied by `JobRepository::update`.
///
/// `updated_at` is not part of the patch: every applied patch advances it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub completed_companies: Option<u32>,
    pub failed_companies: Option<u32>,
    pub results: Option<Vec<JobResult>>,
    pub usage: Option<Usage>,
    /// `Some(None)` clears a previous error.
    pub error: Option<Option<String>>,
    /// Statuses the stored job must be in for the patch to apply.
    pub expected_status: Option<Vec<JobStatus>>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(Some(error.into())),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = Some(error);
        self
    }

    /// Only applies while the stored job is in one of `statuses`.
    pub fn when_status(mut self, statuses: &[JobStatus]) -> Self {
        self.expected_status = Some(statuses.to_vec());
        self
    }

    /// Whether the guard accepts a job currently in `current`.
    pub fn permits(&self, current: JobStatus) -> bool {
        self.expected_status
            .as_ref()
            .map_or(true, |expected| expected.contains(&current))
    }

    /// Applies the patch to `job` and advances `updated_at`.
    pub fn apply(&self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(completed) = self.completed_companies {
            job.completed_companies = completed;
        }
        if let Some(failed) = self.failed_companies {
            job.failed_companies = failed;
        }
        if let Some(results) = &self.results {
            job.results = results.clone();
        }
        if let Some(usage) = self.usage {
            job.total_input_tokens = usage.input_tokens;
            job.total_output_tokens = usage.output_tokens;
            job.total_cost_usd = usage.cost_usd;
        }
        if let Some(error) = &self.error {
            job.error = error.clone();
        }
        job.touch();
    }
}
