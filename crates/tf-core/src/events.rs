//! Live progress fan-out.
//!
//! [`ProgressBroadcaster`] keeps, per job, the set of currently subscribed
//! observers and delivers each published [`Event`] to all of them. Delivery is
//! best-effort and at-most-once: an observer whose buffer is full misses the
//! event, and an observer that subscribes late never sees earlier events. The
//! durable store is the catch-up path for past state.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ids::{JobId, SubscriptionId, VariantId};

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Payload describing what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum EventPayload {
    // -- Job lifecycle -------------------------------------------------------
    #[serde(rename = "job:processing")]
    JobProcessing { job_id: JobId },
    #[serde(rename = "job:completed")]
    JobCompleted { job_id: JobId },
    #[serde(rename = "job:error")]
    JobError { job_id: JobId, error: String },

    // -- Variant lifecycle ---------------------------------------------------
    #[serde(rename = "variant:started")]
    VariantStarted {
        job_id: JobId,
        variant_id: VariantId,
        profile: String,
    },
    #[serde(rename = "progress")]
    Progress {
        job_id: JobId,
        variant_id: VariantId,
        profile: String,
        progress_percent: f64,
        current_time_seconds: f64,
        total_duration_seconds: f64,
        eta_seconds: Option<f64>,
    },
    #[serde(rename = "variant:completed")]
    VariantCompleted {
        job_id: JobId,
        variant_id: VariantId,
        profile: String,
        output_ref: String,
    },
    #[serde(rename = "variant:error")]
    VariantError {
        job_id: JobId,
        variant_id: VariantId,
        profile: String,
        error: String,
    },
}

impl EventPayload {
    /// The job this event belongs to.
    pub fn job_id(&self) -> JobId {
        match self {
            EventPayload::JobProcessing { job_id }
            | EventPayload::JobCompleted { job_id }
            | EventPayload::JobError { job_id, .. }
            | EventPayload::VariantStarted { job_id, .. }
            | EventPayload::Progress { job_id, .. }
            | EventPayload::VariantCompleted { job_id, .. }
            | EventPayload::VariantError { job_id, .. } => *job_id,
        }
    }

    /// Whether this is the final event of a job.
    pub fn is_job_terminal(&self) -> bool {
        matches!(
            self,
            EventPayload::JobCompleted { .. } | EventPayload::JobError { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped event ready for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// An observer's handle on one job's live events.
///
/// `recv` returns `None` once the subscription has been torn down.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    job_id: JobId,
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    /// A subscription that is already closed and will never yield events.
    pub fn closed(job_id: JobId) -> Self {
        let (_, rx) = mpsc::channel(1);
        Self {
            id: SubscriptionId::new(),
            job_id,
            rx,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take the next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

// ---------------------------------------------------------------------------
// ProgressBroadcaster
// ---------------------------------------------------------------------------

type Observers = HashMap<SubscriptionId, mpsc::Sender<Event>>;

/// Job-keyed fan-out of live events to subscribed observers.
pub struct ProgressBroadcaster {
    jobs: RwLock<HashMap<JobId, Observers>>,
    buffer: usize,
}

impl ProgressBroadcaster {
    /// Create a broadcaster whose observers each buffer up to `buffer` events.
    pub fn new(buffer: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Register a new observer for `job_id`.
    pub fn subscribe(&self, job_id: JobId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = SubscriptionId::new();
        self.jobs.write().entry(job_id).or_default().insert(id, tx);
        tracing::debug!(job_id = %job_id, subscription_id = %id, "Observer subscribed");
        Subscription { id, job_id, rx }
    }

    /// Remove an observer. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, job_id: JobId, id: SubscriptionId) -> bool {
        let mut jobs = self.jobs.write();
        let Some(observers) = jobs.get_mut(&job_id) else {
            return false;
        };
        let removed = observers.remove(&id).is_some();
        if observers.is_empty() {
            jobs.remove(&job_id);
        }
        removed
    }

    /// Deliver an event to every current observer of its job.
    ///
    /// Returns the number of observers that accepted the event. Publishing
    /// to a job with no observers is a no-op.
    pub fn publish(&self, payload: EventPayload) -> usize {
        let job_id = payload.job_id();
        let event = Event::new(payload);
        let mut delivered = 0;
        let mut gone = Vec::new();

        {
            let jobs = self.jobs.read();
            let Some(observers) = jobs.get(&job_id) else {
                return 0;
            };
            for (id, tx) in observers {
                match tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!(
                            job_id = %job_id,
                            subscription_id = %id,
                            "Observer buffer full; dropping event"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*id),
                }
            }
        }

        if !gone.is_empty() {
            for id in gone {
                self.unsubscribe(job_id, id);
            }
        }

        delivered
    }

    /// Drop every observer of `job_id`, closing their subscriptions.
    pub fn close_job(&self, job_id: JobId) -> usize {
        let removed = self
            .jobs
            .write()
            .remove(&job_id)
            .map(|o| o.len())
            .unwrap_or(0);
        if removed > 0 {
            tracing::debug!(job_id = %job_id, observers = removed, "Closed job subscriptions");
        }
        removed
    }

    /// Close the job's subscriptions once `grace` has elapsed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule_teardown(self: &Arc<Self>, job_id: JobId, grace: Duration) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            this.close_job(job_id);
        });
    }

    /// Number of observers currently subscribed to `job_id`.
    pub fn subscriber_count(&self, job_id: JobId) -> usize {
        self.jobs.read().get(&job_id).map(|o| o.len()).unwrap_or(0)
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}
