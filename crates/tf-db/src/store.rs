//! The durable state interface used by the orchestrator.
//!
//! [`StateStore`] is object safe so the pipeline can run against any
//! backend; [`SqliteStateStore`] is the pooled SQLite implementation.

use chrono::{DateTime, Utc};
use tf_core::{Error, Job, JobId, JobWithVariants, Result, Status, Variant, VariantId};

use crate::pool::{get_conn, DbPool};
use crate::queries::{jobs, variants};

/// Reason recorded on variants that were left unfinished by a previous run.
pub const INTERRUPTED_REASON: &str = "interrupted";

/// Partial update for one variant. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariantUpdate {
    pub status: Option<Status>,
    pub progress_percent: Option<f64>,
    pub current_position_seconds: Option<f64>,
    pub total_duration_seconds: Option<f64>,
    pub output_ref: Option<String>,
    pub error_message: Option<String>,
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl VariantUpdate {
    /// The encoder's process is running.
    pub fn started(total_duration_seconds: Option<f64>) -> Self {
        Self {
            status: Some(Status::Processing),
            total_duration_seconds,
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn progress(progress_percent: f64, current_position_seconds: f64) -> Self {
        Self {
            progress_percent: Some(progress_percent),
            current_position_seconds: Some(current_position_seconds),
            ..Default::default()
        }
    }

    pub fn completed(output_ref: impl Into<String>) -> Self {
        Self {
            status: Some(Status::Completed),
            progress_percent: Some(100.0),
            output_ref: Some(output_ref.into()),
            exit_code: Some(0),
            finished_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn failed(reason: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            status: Some(Status::Error),
            error_message: Some(reason.into()),
            exit_code,
            finished_at: Some(Utc::now()),
            ..Default::default()
        }
    }
}

/// Partial update for one job. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<Status>,
    pub error_message: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobUpdate {
    /// Update carrying a freshly aggregated status. Terminal statuses stamp
    /// `finished_at`; `error_message` is only kept for `error`.
    pub fn status(status: Status, error_message: Option<String>) -> Self {
        Self {
            status: Some(status),
            error_message: if status == Status::Error {
                error_message
            } else {
                None
            },
            finished_at: status.is_terminal().then(Utc::now),
        }
    }
}

/// Durable record of jobs and variants.
///
/// Updates are per-entity and partial, and never apply to an entity that
/// already reached a terminal status: the `bool` they return reports
/// whether the write took effect.
pub trait StateStore: Send + Sync {
    fn create_job(&self, job: &Job) -> Result<()>;

    fn create_variant(&self, variant: &Variant) -> Result<()>;

    fn update_variant(&self, id: VariantId, update: &VariantUpdate) -> Result<bool>;

    fn update_job(&self, id: JobId, update: &JobUpdate) -> Result<bool>;

    fn get_job_with_variants(&self, id: JobId) -> Result<JobWithVariants>;

    /// Most recently created jobs first.
    fn list_jobs(&self, limit: usize) -> Result<Vec<Job>>;

    /// Fail every variant left `pending` or `processing` by a previous run
    /// and recompute the status of the affected jobs. Returns those jobs.
    fn recover_interrupted(&self) -> Result<Vec<JobId>>;
}

/// [`StateStore`] backed by a pooled SQLite database.
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: DbPool,
}

impl SqliteStateStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl StateStore for SqliteStateStore {
    fn create_job(&self, job: &Job) -> Result<()> {
        let conn = get_conn(&self.pool)?;
        jobs::insert_job(&conn, job)
    }

    fn create_variant(&self, variant: &Variant) -> Result<()> {
        let conn = get_conn(&self.pool)?;
        variants::insert_variant(&conn, variant)
    }

    fn update_variant(&self, id: VariantId, update: &VariantUpdate) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        let fields = variants::VariantFields {
            status: update.status,
            progress_percent: update.progress_percent.map(|p| p.clamp(0.0, 100.0)),
            current_position_seconds: update.current_position_seconds,
            total_duration_seconds: update.total_duration_seconds,
            output_ref: update.output_ref.as_deref(),
            error_message: update.error_message.as_deref(),
            exit_code: update.exit_code,
            started_at: update.started_at,
            finished_at: update.finished_at,
        };
        variants::update_variant(&conn, id, &fields)
    }

    fn update_job(&self, id: JobId, update: &JobUpdate) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        jobs::update_job(
            &conn,
            id,
            update.status,
            update.error_message.as_deref(),
            update.finished_at,
        )
    }

    fn get_job_with_variants(&self, id: JobId) -> Result<JobWithVariants> {
        let conn = get_conn(&self.pool)?;
        let job = jobs::get_job(&conn, id)?.ok_or_else(|| Error::not_found("job", id))?;
        let variants = variants::list_variants_for_job(&conn, id)?;
        Ok(JobWithVariants { job, variants })
    }

    fn list_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        let conn = get_conn(&self.pool)?;
        jobs::list_jobs(&conn, i64::try_from(limit).unwrap_or(i64::MAX))
    }

    fn recover_interrupted(&self) -> Result<Vec<JobId>> {
        let affected = {
            let conn = get_conn(&self.pool)?;
            variants::fail_unfinished(&conn, INTERRUPTED_REASON)?
        };

        for &job_id in &affected {
            let jwv = self.get_job_with_variants(job_id)?;
            let update = JobUpdate::status(jwv.aggregate_status(), jwv.first_error());
            self.update_job(job_id, &update)?;
            tracing::info!(job_id = %job_id, status = %jwv.aggregate_status(), "Recovered interrupted job");
        }

        Ok(affected)
    }
}
