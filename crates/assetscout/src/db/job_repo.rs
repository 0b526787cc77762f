//! Job repository: CRUD operations for the `jobs` table.
//!
//! Entries and results are stored as JSON text columns; the job is always
//! read and written as a whole row.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};

use super::{Database, DatabaseError};
use crate::model::{Job, JobPatch, JobStatus};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub status: String,
    pub primary_provider: String,
    pub supplementary_provider: Option<String>,
    pub total_companies: u32,
    pub completed_companies: u32,
    pub failed_companies: u32,
    pub entries: String,
    pub results: String,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub total_cost_usd: f64,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            status: row.get("status")?,
            primary_provider: row.get("primary_provider")?,
            supplementary_provider: row.get("supplementary_provider")?,
            total_companies: row.get("total_companies")?,
            completed_companies: row.get("completed_companies")?,
            failed_companies: row.get("failed_companies")?,
            entries: row.get("entries")?,
            results: row.get("results")?,
            total_input_tokens: row.get("total_input_tokens")?,
            total_output_tokens: row.get("total_output_tokens")?,
            total_cost_usd: row.get("total_cost_usd")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// Encodes a job into its row form.
    pub fn from_job(job: &Job) -> Result<Self, DatabaseError> {
        let encode = |reason: serde_json::Error| DatabaseError::Corrupt {
            id: job.id.clone(),
            reason: reason.to_string(),
        };
        Ok(Self {
            id: job.id.clone(),
            status: job.status.as_str().to_string(),
            primary_provider: job.primary_provider.clone(),
            supplementary_provider: job.supplementary_provider.clone(),
            total_companies: job.total_companies,
            completed_companies: job.completed_companies,
            failed_companies: job.failed_companies,
            entries: serde_json::to_string(&job.entries).map_err(encode)?,
            results: serde_json::to_string(&job.results).map_err(encode)?,
            total_input_tokens: job.total_input_tokens as i64,
            total_output_tokens: job.total_output_tokens as i64,
            total_cost_usd: job.total_cost_usd,
            error: job.error.clone(),
            created_at: format_timestamp(job.created_at),
            updated_at: format_timestamp(job.updated_at),
        })
    }

    /// Decodes the row back into a job.
    pub fn into_job(self) -> Result<Job, DatabaseError> {
        let corrupt = |reason: String| DatabaseError::Corrupt {
            id: self.id.clone(),
            reason,
        };
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status '{}'", self.status)))?;
        let entries = serde_json::from_str(&self.entries)
            .map_err(|e| corrupt(format!("entries: {}", e)))?;
        let results = serde_json::from_str(&self.results)
            .map_err(|e| corrupt(format!("results: {}", e)))?;
        let created_at = parse_timestamp(&self.created_at).map_err(&corrupt)?;
        let updated_at = parse_timestamp(&self.updated_at).map_err(&corrupt)?;

        Ok(Job {
            status,
            primary_provider: self.primary_provider.clone(),
            supplementary_provider: self.supplementary_provider.clone(),
            total_companies: self.total_companies,
            completed_companies: self.completed_companies,
            failed_companies: self.failed_companies,
            entries,
            results,
            total_input_tokens: self.total_input_tokens.max(0) as u64,
            total_output_tokens: self.total_output_tokens.max(0) as u64,
            total_cost_usd: self.total_cost_usd,
            error: self.error.clone(),
            created_at,
            updated_at,
            id: self.id,
        })
    }
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("timestamp '{}': {}", s, e))
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, status, primary_provider, supplementary_provider,
             total_companies, completed_companies, failed_companies, entries, results,
             total_input_tokens, total_output_tokens, total_cost_usd, error,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                job.id,
                job.status,
                job.primary_provider,
                job.supplementary_provider,
                job.total_companies,
                job.completed_companies,
                job.failed_companies,
                job.entries,
                job.results,
                job.total_input_tokens,
                job.total_output_tokens,
                job.total_cost_usd,
                job.error,
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Updates an existing job row. All fields except `id` and `created_at` are overwritten.
///
/// Returns the number of rows touched (0 when the job does not exist).
pub fn update(db: &Database, job: &JobRow) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| write_row(conn, job))
}

fn write_row(conn: &Connection, job: &JobRow) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status=?2, primary_provider=?3, supplementary_provider=?4,
         total_companies=?5, completed_companies=?6, failed_companies=?7, entries=?8,
         results=?9, total_input_tokens=?10, total_output_tokens=?11,
         total_cost_usd=?12, error=?13, updated_at=?14
         WHERE id=?1",
        params![
            job.id,
            job.status,
            job.primary_provider,
            job.supplementary_provider,
            job.total_companies,
            job.completed_companies,
            job.failed_companies,
            job.entries,
            job.results,
            job.total_input_tokens,
            job.total_output_tokens,
            job.total_cost_usd,
            job.error,
            job.updated_at,
        ],
    )?;
    Ok(changed)
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| select_by_id(conn, id))
}

fn select_by_id(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Outcome of [`apply_patch`].
#[derive(Debug)]
pub enum PatchOutcome {
    Applied(Job),
    NotFound,
    /// The patch's status guard rejected the stored status.
    Rejected(JobStatus),
}

/// Reads, patches and writes a job while holding the connection lock, so
/// status guards are checked against the value actually overwritten.
pub fn apply_patch(
    db: &Database,
    id: &str,
    patch: &JobPatch,
) -> Result<PatchOutcome, DatabaseError> {
    db.with_conn(|conn| {
        let Some(row) = select_by_id(conn, id)? else {
            return Ok(PatchOutcome::NotFound);
        };
        let mut job = row.into_job()?;
        if !patch.permits(job.status) {
            return Ok(PatchOutcome::Rejected(job.status));
        }
        patch.apply(&mut job);
        write_row(conn, &JobRow::from_job(&job)?)?;
        Ok(PatchOutcome::Applied(job))
    })
}

/// Returns every job, oldest first.
pub fn list_all(db: &Database) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY created_at ASC, id ASC")?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
