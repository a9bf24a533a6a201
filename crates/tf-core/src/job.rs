//! Job and variant data model.
//!
//! A [`Job`] covers one input and a fixed list of requested profiles. Each
//! profile becomes one [`Variant`]. The job status is never set on its own:
//! it is always recomputed from the variant statuses with [`aggregate_status`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::ids::{JobId, VariantId};
use crate::profile::Profile;

/// Lifecycle status shared by jobs and variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Processing,
    Completed,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Processing => "processing",
            Status::Completed => "completed",
            Status::Error => "error",
        }
    }

    /// `completed` and `error` are terminal; no further transitions occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "processing" => Ok(Status::Processing),
            "completed" => Ok(Status::Completed),
            "error" => Ok(Status::Error),
            other => Err(Error::Validation(format!("unknown status '{other}'"))),
        }
    }
}

/// Compute a job status from the statuses of its variants.
///
/// - any `error` => `error`
/// - all `completed` => `completed`
/// - any variant past `pending` => `processing`
/// - otherwise `pending`
pub fn aggregate_status<I>(statuses: I) -> Status
where
    I: IntoIterator<Item = Status>,
{
    let mut any = false;
    let mut all_completed = true;
    let mut any_started = false;

    for status in statuses {
        any = true;
        match status {
            Status::Error => return Status::Error,
            Status::Completed => any_started = true,
            Status::Processing => {
                any_started = true;
                all_completed = false;
            }
            Status::Pending => all_completed = false,
        }
    }

    if any && all_completed {
        Status::Completed
    } else if any_started {
        Status::Processing
    } else {
        Status::Pending
    }
}

/// Percentage of `current` over `total`, clamped to `[0, 100]`.
///
/// Returns `None` when the total duration is unknown or not positive: a
/// percentage is never invented without a duration to measure against.
pub fn progress_percent(current_secs: f64, total_secs: Option<f64>) -> Option<f64> {
    let total = total_secs.filter(|t| t.is_finite() && *t > 0.0)?;
    let pct = current_secs / total * 100.0;
    if pct.is_nan() {
        return Some(0.0);
    }
    Some(pct.clamp(0.0, 100.0))
}

/// One submitted transcoding request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    /// Source media reference. The job does not own the file.
    pub input_ref: String,
    pub requested_profiles: Vec<String>,
    pub status: Status,
    pub variants: Vec<VariantId>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Job {
    pub fn new(input_ref: impl Into<String>, requested_profiles: Vec<String>) -> Self {
        Self {
            id: JobId::new(),
            input_ref: input_ref.into(),
            requested_profiles,
            status: Status::Pending,
            variants: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
            error_message: None,
        }
    }
}

/// One (input, profile) transcoding unit belonging to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: VariantId,
    pub job_id: JobId,
    pub profile: Profile,
    pub status: Status,
    pub progress_percent: f64,
    pub current_position_seconds: f64,
    pub total_duration_seconds: Option<f64>,
    /// Set iff `status == completed`.
    pub output_ref: Option<String>,
    /// Set iff `status == error`.
    pub error_message: Option<String>,
    pub exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Variant {
    pub fn new(job_id: JobId, profile: Profile) -> Self {
        Self {
            id: VariantId::new(),
            job_id,
            profile,
            status: Status::Pending,
            progress_percent: 0.0,
            current_position_seconds: 0.0,
            total_duration_seconds: None,
            output_ref: None,
            error_message: None,
            exit_code: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// A job together with its variants, in request order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobWithVariants {
    pub job: Job,
    pub variants: Vec<Variant>,
}

impl JobWithVariants {
    /// Status implied by the current variant statuses.
    pub fn aggregate_status(&self) -> Status {
        aggregate_status(self.variants.iter().map(|v| v.status))
    }

    /// The job-level error message: the earliest variant failure, prefixed
    /// with its profile name.
    pub fn first_error(&self) -> Option<String> {
        self.variants
            .iter()
            .enumerate()
            .filter(|(_, v)| v.status == Status::Error)
            .min_by_key(|(i, v)| (v.finished_at, *i))
            .map(|(_, v)| {
                format!(
                    "{}: {}",
                    v.profile.name,
                    v.error_message.as_deref().unwrap_or("unknown error")
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn aggregate_any_error_wins() {
        let s = aggregate_status([Status::Completed, Status::Error, Status::Processing]);
        assert_eq!(s, Status::Error);
    }

    #[test]
    fn aggregate_all_completed() {
        let s = aggregate_status([Status::Completed, Status::Completed]);
        assert_eq!(s, Status::Completed);
    }

    #[test]
    fn aggregate_processing_once_any_started() {
        assert_eq!(
            aggregate_status([Status::Completed, Status::Pending]),
            Status::Processing
        );
        assert_eq!(
            aggregate_status([Status::Processing, Status::Pending]),
            Status::Processing
        );
    }

    #[test]
    fn aggregate_all_pending() {
        assert_eq!(
            aggregate_status([Status::Pending, Status::Pending]),
            Status::Pending
        );
        assert_eq!(aggregate_status([]), Status::Pending);
    }

    #[test]
    fn progress_is_clamped() {
        assert_eq!(progress_percent(30.0, Some(60.0)), Some(50.0));
        assert_eq!(progress_percent(90.0, Some(60.0)), Some(100.0));
        assert_eq!(progress_percent(-5.0, Some(60.0)), Some(0.0));
    }

    #[test]
    fn progress_requires_known_duration() {
        assert_eq!(progress_percent(30.0, None), None);
        assert_eq!(progress_percent(30.0, Some(0.0)), None);
        assert_eq!(progress_percent(30.0, Some(f64::NAN)), None);
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [Status::Pending, Status::Processing, Status::Completed, Status::Error] {
            assert_eq!(s.as_str().parse::<Status>().unwrap(), s);
        }
        assert!("running".parse::<Status>().is_err());
    }

    #[test]
    fn first_error_is_earliest_failure() {
        let job = Job::new("/in.mp4", vec!["480p".into(), "720p".into()]);
        let mut a = Variant::new(job.id, Profile::new("480p", 480, "1400k"));
        let mut b = Variant::new(job.id, Profile::new("720p", 720, "2800k"));
        let now = Utc::now();

        a.status = Status::Error;
        a.error_message = Some("cancelled".into());
        a.finished_at = Some(now);
        b.status = Status::Error;
        b.error_message = Some("process exited with code 1".into());
        b.finished_at = Some(now - Duration::seconds(5));

        let jwv = JobWithVariants {
            job,
            variants: vec![a, b],
        };
        assert_eq!(
            jwv.first_error().as_deref(),
            Some("720p: process exited with code 1")
        );
    }
}
