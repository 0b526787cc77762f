//! Job progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::JobCounts;

/// What happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobProgressKind {
    /// The job was claimed and its primary phase is starting.
    Started,
    /// A lane claimed an entry.
    Processing { company: String },
    /// An entry finished successfully.
    Completed {
        company: String,
        assets_found: u32,
        counts: JobCounts,
    },
    /// An entry failed after exhausting its attempts.
    Error {
        company: String,
        message: String,
        counts: JobCounts,
    },
    /// The job left the `running` state.
    Done { counts: JobCounts },
    SupplementaryStarted { companies: u32 },
    SupplementaryCompleted { company: String, new_assets: u32 },
}

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    /// Unique job identifier.
    pub job_id: String,
    /// Timestamp of this event.
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: JobProgressKind,
}

impl JobProgressEvent {
    pub fn new(job_id: &str, kind: JobProgressKind) -> Self {
        Self {
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn started(job_id: &str) -> Self {
        Self::new(job_id, JobProgressKind::Started)
    }

    pub fn processing(job_id: &str, company: &str) -> Self {
        Self::new(
            job_id,
            JobProgressKind::Processing {
                company: company.to_string(),
            },
        )
    }

    pub fn completed(job_id: &str, company: &str, assets_found: u32, counts: JobCounts) -> Self {
        Self::new(
            job_id,
            JobProgressKind::Completed {
                company: company.to_string(),
                assets_found,
                counts,
            },
        )
    }

    pub fn error(job_id: &str, company: &str, message: &str, counts: JobCounts) -> Self {
        Self::new(
            job_id,
            JobProgressKind::Error {
                company: company.to_string(),
                message: message.to_string(),
                counts,
            },
        )
    }

    pub fn done(job_id: &str, counts: JobCounts) -> Self {
        Self::new(job_id, JobProgressKind::Done { counts })
    }

    /// True for the last event emitted for a run.
    pub fn is_done(&self) -> bool {
        matches!(self.kind, JobProgressKind::Done { .. })
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Emitter bound to one job.
    pub fn for_job(&self, job_id: &str) -> JobProgressTracker {
        JobProgressTracker {
            job_id: job_id.to_string(),
            broadcaster: self.clone(),
        }
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Emits events for a single job.
#[derive(Clone)]
pub struct JobProgressTracker {
    job_id: String,
    broadcaster: JobProgressBroadcaster,
}

impl JobProgressTracker {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn started(&self) {
        self.broadcaster.send(JobProgressEvent::started(&self.job_id));
    }

    pub fn processing(&self, company: &str) {
        self.broadcaster
            .send(JobProgressEvent::processing(&self.job_id, company));
    }

    pub fn completed(&self, company: &str, assets_found: u32, counts: JobCounts) {
        self.broadcaster.send(JobProgressEvent::completed(
            &self.job_id,
            company,
            assets_found,
            counts,
        ));
    }

    pub fn error(&self, company: &str, message: &str, counts: JobCounts) {
        self.broadcaster
            .send(JobProgressEvent::error(&self.job_id, company, message, counts));
    }

    pub fn supplementary_started(&self, companies: u32) {
        self.broadcaster.send(JobProgressEvent::new(
            &self.job_id,
            JobProgressKind::SupplementaryStarted { companies },
        ));
    }

    pub fn supplementary_completed(&self, company: &str, new_assets: u32) {
        self.broadcaster.send(JobProgressEvent::new(
            &self.job_id,
            JobProgressKind::SupplementaryCompleted {
                company: company.to_string(),
                new_assets,
            },
        ));
    }

    pub fn done(&self, counts: JobCounts) {
        self.broadcaster
            .send(JobProgressEvent::done(&self.job_id, counts));
    }
}
