//! Row mapping from the `jobs` and `variants` tables onto the core model.
//!
//! Timestamps are stored as RFC 3339 text, statuses as their lowercase
//! names and the requested profile list as a JSON array.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use tf_core::{Job, Profile, Status, Variant};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

fn conversion_err(
    idx: usize,
    e: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
}

/// Parse a UUID-based ID from a text column.
fn parse_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    let uuid = Uuid::parse_str(&s).map_err(|e| conversion_err(idx, e))?;
    Ok(T::from(uuid))
}

fn parse_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn parse_opt_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    match s {
        Some(v) => DateTime::parse_from_rfc3339(&v)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| conversion_err(idx, e)),
        None => Ok(None),
    }
}

fn parse_status(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Status> {
    let s: String = row.get(idx)?;
    s.parse::<Status>().map_err(|e| conversion_err(idx, e))
}

/// Format a timestamp the way it is stored. The fixed width keeps text
/// ordering equal to time ordering.
pub fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Columns selected by [`job_from_row`], in order.
pub const JOB_COLS: &str =
    "id, input_ref, requested_profiles, status, error_message, created_at, finished_at";

/// Build a [`Job`] from a row selected with [`JOB_COLS`].
///
/// The variant id list is not part of the row; callers fill it in.
pub fn job_from_row(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    let profiles_json: String = row.get(2)?;
    let requested_profiles: Vec<String> =
        serde_json::from_str(&profiles_json).map_err(|e| conversion_err(2, e))?;

    Ok(Job {
        id: parse_id(row, 0)?,
        input_ref: row.get(1)?,
        requested_profiles,
        status: parse_status(row, 3)?,
        variants: Vec::new(),
        created_at: parse_ts(row, 5)?,
        finished_at: parse_opt_ts(row, 6)?,
        error_message: row.get(4)?,
    })
}

// ---------------------------------------------------------------------------
// Variant
// ---------------------------------------------------------------------------

/// Columns selected by [`variant_from_row`], in order.
pub const VARIANT_COLS: &str = "id, job_id, profile_name, profile_height, profile_bitrate,
    status, progress_percent, current_position_seconds, total_duration_seconds,
    output_ref, error_message, exit_code, created_at, started_at, finished_at";

/// Build a [`Variant`] from a row selected with [`VARIANT_COLS`].
pub fn variant_from_row(row: &rusqlite::Row) -> rusqlite::Result<Variant> {
    Ok(Variant {
        id: parse_id(row, 0)?,
        job_id: parse_id(row, 1)?,
        profile: Profile {
            name: row.get(2)?,
            height: row.get(3)?,
            bitrate: row.get(4)?,
        },
        status: parse_status(row, 5)?,
        progress_percent: row.get(6)?,
        current_position_seconds: row.get(7)?,
        total_duration_seconds: row.get(8)?,
        output_ref: row.get(9)?,
        error_message: row.get(10)?,
        exit_code: row.get(11)?,
        created_at: parse_ts(row, 12)?,
        started_at: parse_opt_ts(row, 13)?,
        finished_at: parse_opt_ts(row, 14)?,
    })
}
