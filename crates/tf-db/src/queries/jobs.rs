//! Job record operations.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tf_core::{Error, Job, JobId, Result, Status, VariantId};

use crate::models::{job_from_row, ts, JOB_COLS};

/// Insert a new job row. The variant list is stored on the variant rows.
pub fn insert_job(conn: &Connection, job: &Job) -> Result<()> {
    let profiles = serde_json::to_string(&job.requested_profiles)
        .map_err(|e| Error::Internal(format!("failed to encode profiles: {e}")))?;

    conn.execute(
        "INSERT INTO jobs (id, input_ref, requested_profiles, status, error_message, created_at, finished_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            job.id.to_string(),
            job.input_ref,
            profiles,
            job.status.as_str(),
            job.error_message,
            ts(job.created_at),
            job.finished_at.map(ts),
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Get a job by ID, with its variant ids in request order.
pub fn get_job(conn: &Connection, id: JobId) -> Result<Option<Job>> {
    let q = format!("SELECT {JOB_COLS} FROM jobs WHERE id = ?1");
    let result = conn.query_row(&q, [id.to_string()], job_from_row);
    match result {
        Ok(mut job) => {
            job.variants = variant_ids(conn, id)?;
            Ok(Some(job))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List the most recently created jobs, newest first.
pub fn list_jobs(conn: &Connection, limit: i64) -> Result<Vec<Job>> {
    let q = format!("SELECT {JOB_COLS} FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1");
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let mut jobs = stmt
        .query_map([limit], job_from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    for job in &mut jobs {
        job.variants = variant_ids(conn, job.id)?;
    }
    Ok(jobs)
}

/// Variant ids of a job, in request order.
pub fn variant_ids(conn: &Connection, job_id: JobId) -> Result<Vec<VariantId>> {
    let mut stmt = conn
        .prepare("SELECT id FROM variants WHERE job_id = ?1 ORDER BY position")
        .map_err(|e| Error::database(e.to_string()))?;
    let ids = stmt
        .query_map([job_id.to_string()], |row| row.get::<_, String>(0))
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    ids.iter()
        .map(|s| {
            s.parse::<VariantId>()
                .map_err(|e| Error::database(format!("bad variant id '{s}': {e}")))
        })
        .collect()
}

/// Apply a partial update to a job that has not reached a terminal status.
///
/// `finished_at` and `error_message` are only ever written once. Returns
/// `false` when the job exists but is already terminal.
pub fn update_job(
    conn: &Connection,
    id: JobId,
    status: Option<Status>,
    error_message: Option<&str>,
    finished_at: Option<DateTime<Utc>>,
) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE jobs SET
                status = COALESCE(?1, status),
                error_message = COALESCE(error_message, ?2),
                finished_at = COALESCE(finished_at, ?3)
             WHERE id = ?4 AND status NOT IN ('completed', 'error')",
            rusqlite::params![
                status.map(|s| s.as_str()),
                error_message,
                finished_at.map(ts),
                id.to_string(),
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if n == 0 && !job_exists(conn, id)? {
        return Err(Error::not_found("job", id));
    }
    Ok(n > 0)
}

fn job_exists(conn: &Connection, id: JobId) -> Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM jobs WHERE id = ?1",
        [id.to_string()],
        |row| row.get(0),
    )
    .map_err(|e| Error::database(e.to_string()))
}
