//! Variant record operations.
//!
//! Every write touches exactly one variant row, so encoders of sibling
//! variants never overwrite each other's progress.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tf_core::{Error, JobId, Result, Status, Variant, VariantId};

use crate::models::{ts, variant_from_row, VARIANT_COLS};

/// Insert a variant row after the job's existing variants.
pub fn insert_variant(conn: &Connection, variant: &Variant) -> Result<()> {
    conn.execute(
        "INSERT INTO variants (id, job_id, position, profile_name, profile_height, profile_bitrate,
             status, progress_percent, current_position_seconds, total_duration_seconds,
             output_ref, error_message, exit_code, created_at, started_at, finished_at)
         VALUES (?1, ?2, (SELECT COUNT(*) FROM variants WHERE job_id = ?2), ?3, ?4, ?5,
             ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        rusqlite::params![
            variant.id.to_string(),
            variant.job_id.to_string(),
            variant.profile.name,
            variant.profile.height,
            variant.profile.bitrate,
            variant.status.as_str(),
            variant.progress_percent,
            variant.current_position_seconds,
            variant.total_duration_seconds,
            variant.output_ref,
            variant.error_message,
            variant.exit_code,
            ts(variant.created_at),
            variant.started_at.map(ts),
            variant.finished_at.map(ts),
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
        {
            Error::not_found("job", variant.job_id)
        }
        other => Error::database(other.to_string()),
    })?;
    Ok(())
}

/// Get a variant by ID.
pub fn get_variant(conn: &Connection, id: VariantId) -> Result<Option<Variant>> {
    let q = format!("SELECT {VARIANT_COLS} FROM variants WHERE id = ?1");
    match conn.query_row(&q, [id.to_string()], variant_from_row) {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// All variants of a job, in request order.
pub fn list_variants_for_job(conn: &Connection, job_id: JobId) -> Result<Vec<Variant>> {
    let q = format!("SELECT {VARIANT_COLS} FROM variants WHERE job_id = ?1 ORDER BY position");
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([job_id.to_string()], variant_from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// Field values for a partial variant update. `None` leaves a column as is.
#[derive(Debug, Default)]
pub struct VariantFields<'a> {
    pub status: Option<Status>,
    pub progress_percent: Option<f64>,
    pub current_position_seconds: Option<f64>,
    pub total_duration_seconds: Option<f64>,
    pub output_ref: Option<&'a str>,
    pub error_message: Option<&'a str>,
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Apply a partial update to a variant that is not yet terminal.
///
/// Progress only moves forward and the timestamps are stamped once.
/// Returns `false` when the variant exists but is already terminal.
pub fn update_variant(conn: &Connection, id: VariantId, f: &VariantFields<'_>) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE variants SET
                status = COALESCE(?1, status),
                progress_percent = MAX(progress_percent, COALESCE(?2, progress_percent)),
                current_position_seconds = COALESCE(?3, current_position_seconds),
                total_duration_seconds = COALESCE(?4, total_duration_seconds),
                output_ref = COALESCE(?5, output_ref),
                error_message = COALESCE(?6, error_message),
                exit_code = COALESCE(?7, exit_code),
                started_at = COALESCE(started_at, ?8),
                finished_at = COALESCE(finished_at, ?9)
             WHERE id = ?10 AND status NOT IN ('completed', 'error')",
            rusqlite::params![
                f.status.map(|s| s.as_str()),
                f.progress_percent,
                f.current_position_seconds,
                f.total_duration_seconds,
                f.output_ref,
                f.error_message,
                f.exit_code,
                f.started_at.map(ts),
                f.finished_at.map(ts),
                id.to_string(),
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if n == 0 && get_variant(conn, id)?.is_none() {
        return Err(Error::not_found("variant", id));
    }
    Ok(n > 0)
}

/// Fail every non-terminal variant with `reason`, returning the ids of the
/// jobs that owned them.
pub fn fail_unfinished(conn: &Connection, reason: &str) -> Result<Vec<JobId>> {
    let now = ts(Utc::now());
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;

    let job_ids: Vec<String> = {
        let mut stmt = tx
            .prepare(
                "SELECT DISTINCT job_id FROM variants
                 WHERE status IN ('pending', 'processing') ORDER BY job_id",
            )
            .map_err(|e| Error::database(e.to_string()))?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| Error::database(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::database(e.to_string()))?;
        ids
    };

    tx.execute(
        "UPDATE variants SET status = 'error', error_message = ?1,
             finished_at = COALESCE(finished_at, ?2)
         WHERE status IN ('pending', 'processing')",
        rusqlite::params![reason, now],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;

    job_ids
        .iter()
        .map(|s| {
            s.parse::<JobId>()
                .map_err(|e| Error::database(format!("bad job id '{s}': {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{get_conn, init_memory_pool};
    use crate::queries::jobs::insert_job;
    use tf_core::{Job, Profile};

    fn setup() -> (crate::DbPool, Job) {
        let pool = init_memory_pool().unwrap();
        let job = Job::new("/in.mp4", vec!["480p".into(), "720p".into()]);
        insert_job(&get_conn(&pool).unwrap(), &job).unwrap();
        (pool, job)
    }

    #[test]
    fn test_insert_keeps_request_order() {
        let (pool, job) = setup();
        let conn = get_conn(&pool).unwrap();

        let a = Variant::new(job.id, Profile::new("720p", 720, "2800k"));
        let b = Variant::new(job.id, Profile::new("480p", 480, "1400k"));
        insert_variant(&conn, &a).unwrap();
        insert_variant(&conn, &b).unwrap();

        let listed = list_variants_for_job(&conn, job.id).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, a.id);
        assert_eq!(listed[1].profile.name, "480p");
        assert_eq!(listed[1].profile.height, 480);
    }

    #[test]
    fn test_insert_for_missing_job() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let v = Variant::new(JobId::new(), Profile::new("480p", 480, "1400k"));
        assert!(matches!(
            insert_variant(&conn, &v),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_progress_never_decreases() {
        let (pool, job) = setup();
        let conn = get_conn(&pool).unwrap();
        let v = Variant::new(job.id, Profile::new("480p", 480, "1400k"));
        insert_variant(&conn, &v).unwrap();

        let at = |pct: f64| VariantFields {
            progress_percent: Some(pct),
            ..Default::default()
        };
        update_variant(&conn, v.id, &at(40.0)).unwrap();
        update_variant(&conn, v.id, &at(25.0)).unwrap();

        let found = get_variant(&conn, v.id).unwrap().unwrap();
        assert_eq!(found.progress_percent, 40.0);
    }

    #[test]
    fn test_terminal_variant_is_frozen() {
        let (pool, job) = setup();
        let conn = get_conn(&pool).unwrap();
        let v = Variant::new(job.id, Profile::new("480p", 480, "1400k"));
        insert_variant(&conn, &v).unwrap();

        let done = VariantFields {
            status: Some(Status::Completed),
            progress_percent: Some(100.0),
            output_ref: Some("/out/480p.mp4"),
            exit_code: Some(0),
            finished_at: Some(Utc::now()),
            ..Default::default()
        };
        assert!(update_variant(&conn, v.id, &done).unwrap());

        let late = VariantFields {
            status: Some(Status::Error),
            error_message: Some("cancelled"),
            ..Default::default()
        };
        assert!(!update_variant(&conn, v.id, &late).unwrap());

        let found = get_variant(&conn, v.id).unwrap().unwrap();
        assert_eq!(found.status, Status::Completed);
        assert_eq!(found.output_ref.as_deref(), Some("/out/480p.mp4"));
        assert!(found.error_message.is_none());
    }

    #[test]
    fn test_update_missing_variant() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let err = update_variant(&conn, VariantId::new(), &VariantFields::default()).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_fail_unfinished() {
        let (pool, job) = setup();
        let conn = get_conn(&pool).unwrap();
        let running = Variant::new(job.id, Profile::new("480p", 480, "1400k"));
        let mut done = Variant::new(job.id, Profile::new("720p", 720, "2800k"));
        done.status = Status::Completed;
        done.output_ref = Some("/out/720p.mp4".into());
        insert_variant(&conn, &running).unwrap();
        insert_variant(&conn, &done).unwrap();

        let jobs = fail_unfinished(&conn, "interrupted").unwrap();
        assert_eq!(jobs, vec![job.id]);

        let listed = list_variants_for_job(&conn, job.id).unwrap();
        assert_eq!(listed[0].status, Status::Error);
        assert_eq!(listed[0].error_message.as_deref(), Some("interrupted"));
        assert_eq!(listed[1].status, Status::Completed);

        assert!(fail_unfinished(&conn, "interrupted").unwrap().is_empty());
    }
}
