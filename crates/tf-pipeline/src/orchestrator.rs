//! Job Orchestrator.
//!
//! [`JobOrchestrator::submit`] persists a pending job with one pending
//! variant per requested profile and returns at once. A background task then
//! supervises one [`VariantEncoder`] run per variant, all in parallel up to a
//! global ceiling on live transcoder processes.
//!
//! Each encoder event has two independent consumers: the
//! [`ProgressBroadcaster`] (live observers) and the [`StateStore`] (durable
//! state). The job status is never written on its own; after every variant
//! transition it is recomputed from the stored variants under a per-job lock.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tf_av::{DurationProbe, EncodeRequest, EncoderEvent, ProgressEvent, VariantEncoder};
use tf_core::config::Config;
use tf_core::error::describe_exit;
use tf_core::events::{EventPayload, ProgressBroadcaster, Subscription};
use tf_core::{Error, Job, JobId, JobWithVariants, Result, Status, Variant};
use tf_db::{JobUpdate, StateStore, VariantUpdate};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::retry::{retry_transient, RetryConfig};

/// Tuning knobs for [`JobOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Root directory for outputs: `<output_dir>/<job_id>/<profile>.mp4`.
    pub output_dir: PathBuf,
    /// Ceiling on transcoder processes running at once, across all jobs.
    pub max_concurrent_variants: usize,
    /// How long subscriptions stay open after a job's terminal event.
    pub subscriber_grace: Duration,
    pub retry: RetryConfig,
}

impl OrchestratorOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            output_dir: cfg.storage.output_dir.clone(),
            max_concurrent_variants: cfg.pipeline.max_concurrent_variants,
            subscriber_grace: cfg.pipeline.subscriber_grace(),
            retry: RetryConfig::from_pipeline(&cfg.pipeline),
        }
    }
}

/// Submits jobs and supervises their variants.
///
/// Cheap to clone; clones share the same store, broadcaster and process
/// ceiling.
#[derive(Clone)]
pub struct JobOrchestrator {
    store: Arc<dyn StateStore>,
    broadcaster: Arc<ProgressBroadcaster>,
    encoder: Arc<VariantEncoder>,
    probe: Arc<dyn DurationProbe>,
    permits: Arc<Semaphore>,
    active: Arc<DashMap<JobId, CancellationToken>>,
    output_dir: PathBuf,
    retry: RetryConfig,
    grace: Duration,
}

/// Per-job state shared by the variant supervisors of one job.
struct JobContext {
    job_id: JobId,
    input: PathBuf,
    duration: Option<f64>,
    cancel: CancellationToken,
    aggregate: Mutex<Aggregate>,
}

/// Last job status written to the store, guarded by the per-job lock.
#[derive(Debug)]
struct Aggregate {
    status: Status,
    error: Option<String>,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn StateStore>,
        broadcaster: Arc<ProgressBroadcaster>,
        encoder: VariantEncoder,
        probe: Arc<dyn DurationProbe>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            broadcaster,
            encoder: Arc::new(encoder),
            probe,
            permits: Arc::new(Semaphore::new(options.max_concurrent_variants.max(1))),
            active: Arc::new(DashMap::new()),
            output_dir: options.output_dir,
            retry: options.retry,
            grace: options.subscriber_grace,
        }
    }

    /// Submit a job and start encoding in the background.
    ///
    /// Fails synchronously only for [`Error::Configuration`] (empty,
    /// duplicate, unknown or invalid profiles), before anything is persisted, or when
    /// the job cannot be recorded at all. `duration_hint` skips probing.
    pub async fn submit(
        &self,
        input_ref: &str,
        profiles: &[String],
        duration_hint: Option<f64>,
    ) -> Result<Job> {
        self.submit_inner(input_ref, profiles, duration_hint, false)
            .await
            .map(|(job, _)| job)
    }

    /// Like [`submit`](Self::submit), but subscribes to the job's live
    /// events before any of them can be published.
    pub async fn submit_subscribed(
        &self,
        input_ref: &str,
        profiles: &[String],
        duration_hint: Option<f64>,
    ) -> Result<(Job, Subscription)> {
        let (job, sub) = self
            .submit_inner(input_ref, profiles, duration_hint, true)
            .await?;
        let sub = sub.unwrap_or_else(|| Subscription::closed(job.id));
        Ok((job, sub))
    }

    async fn submit_inner(
        &self,
        input_ref: &str,
        profiles: &[String],
        duration_hint: Option<f64>,
        subscribe: bool,
    ) -> Result<(Job, Option<Subscription>)> {
        let resolved = self.encoder.profiles().resolve(profiles)?;

        let mut job = Job::new(input_ref, profiles.to_vec());
        let variants: Vec<Variant> = resolved
            .into_iter()
            .map(|p| Variant::new(job.id, p))
            .collect();
        job.variants = variants.iter().map(|v| v.id).collect();

        retry_transient(&self.retry, "create job", || self.store.create_job(&job)).await?;
        for variant in &variants {
            let created = retry_transient(&self.retry, "create variant", || {
                self.store.create_variant(variant)
            })
            .await;
            if let Err(e) = created {
                let update = JobUpdate::status(Status::Error, Some(format!("persistence failure: {e}")));
                if let Err(write) = retry_transient(&self.retry, "fail job", || {
                    self.store.update_job(job.id, &update)
                })
                .await
                {
                    tracing::error!(job_id = %job.id, error = %write, "Could not record job failure");
                }
                return Err(e);
            }
        }

        let cancel = CancellationToken::new();
        self.active.insert(job.id, cancel.clone());
        let sub = subscribe.then(|| self.broadcaster.subscribe(job.id));

        tracing::info!(
            job_id = %job.id,
            input = %job.input_ref,
            profiles = ?job.requested_profiles,
            "Job submitted"
        );

        tokio::spawn(self.clone().run_job(job.clone(), variants, duration_hint, cancel));
        Ok((job, sub))
    }

    /// Current durable state of a job.
    pub async fn job(&self, id: JobId) -> Result<JobWithVariants> {
        retry_transient(&self.retry, "read job", || self.store.get_job_with_variants(id)).await
    }

    /// Most recently submitted jobs first.
    pub async fn list(&self, limit: usize) -> Result<Vec<Job>> {
        retry_transient(&self.retry, "list jobs", || self.store.list_jobs(limit)).await
    }

    /// Subscribe to a job's live events.
    ///
    /// A job that is no longer running yields an already-closed
    /// subscription; its final state is available from [`job`](Self::job).
    pub async fn subscribe(&self, id: JobId) -> Result<Subscription> {
        self.job(id).await?;
        match self.active.get(&id) {
            Some(_) => Ok(self.broadcaster.subscribe(id)),
            None => Ok(Subscription::closed(id)),
        }
    }

    /// Whether the job's variants are still being supervised.
    pub fn is_active(&self, id: JobId) -> bool {
        self.active.contains_key(&id)
    }

    /// Cancel every non-terminal variant of a job.
    ///
    /// Running transcoders are killed and their variants fail with reason
    /// `cancelled`; finished variants are left untouched. Returns `false` if
    /// the job had already finished.
    pub async fn cancel(&self, id: JobId) -> Result<bool> {
        if let Some(token) = self.active.get(&id) {
            tracing::info!(job_id = %id, "Cancelling job");
            token.cancel();
            return Ok(true);
        }
        self.job(id).await?;
        Ok(false)
    }

    /// Fail variants left unfinished by a previous process. Run before
    /// submitting anything.
    pub async fn recover_interrupted(&self) -> Result<Vec<JobId>> {
        retry_transient(&self.retry, "recover interrupted jobs", || {
            self.store.recover_interrupted()
        })
        .await
    }

    // -- supervision ----------------------------------------------------------

    async fn run_job(
        self,
        job: Job,
        variants: Vec<Variant>,
        duration_hint: Option<f64>,
        cancel: CancellationToken,
    ) {
        let input = PathBuf::from(&job.input_ref);
        let duration = self.resolve_duration(job.id, &input, duration_hint).await;

        let ctx = Arc::new(JobContext {
            job_id: job.id,
            input,
            duration,
            cancel,
            aggregate: Mutex::new(Aggregate {
                status: Status::Pending,
                error: None,
            }),
        });

        let handles: Vec<_> = variants
            .into_iter()
            .map(|v| tokio::spawn(self.clone().run_variant(Arc::clone(&ctx), v)))
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(job_id = %ctx.job_id, error = %e, "Variant supervisor failed");
            }
        }

        self.finish_job(&ctx).await;
    }

    async fn resolve_duration(
        &self,
        job_id: JobId,
        input: &std::path::Path,
        hint: Option<f64>,
    ) -> Option<f64> {
        if let Some(d) = hint.filter(|d| d.is_finite() && *d > 0.0) {
            return Some(d);
        }
        match self.probe.duration(input).await {
            Ok(Some(d)) => {
                tracing::debug!(job_id = %job_id, duration = d, "Probed source duration");
                Some(d)
            }
            Ok(None) => {
                tracing::info!(job_id = %job_id, "Source duration unknown; progress will not be reported");
                None
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Duration probe failed; progress will not be reported");
                None
            }
        }
    }

    async fn run_variant(self, ctx: Arc<JobContext>, variant: Variant) {
        let permit = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        };

        let result = match permit {
            Some(_permit) => self.encode(&ctx, &variant).await,
            None => Err(Error::Cancelled),
        };

        self.finish_variant(&ctx, &variant, result).await;
    }

    async fn encode(&self, ctx: &JobContext, variant: &Variant) -> Result<String> {
        let output = self
            .output_dir
            .join(ctx.job_id.to_string())
            .join(format!("{}.mp4", variant.profile.name));
        let request = EncodeRequest {
            input: ctx.input.clone(),
            profile: variant.profile.name.clone(),
            output,
            duration_seconds: ctx.duration,
        };

        let mut run = self.encoder.start(request, ctx.cancel.clone())?;
        while let Some(event) = run.events.recv().await {
            match event {
                EncoderEvent::Started { .. } => self.variant_started(ctx, variant).await,
                EncoderEvent::Progress(progress) => {
                    self.variant_progress(ctx, variant, progress).await
                }
            }
        }
        run.wait().await
    }

    async fn variant_started(&self, ctx: &JobContext, variant: &Variant) {
        let update = VariantUpdate::started(ctx.duration);
        let written = retry_transient(&self.retry, "mark variant processing", || {
            self.store.update_variant(variant.id, &update)
        })
        .await;
        if let Err(e) = written {
            self.persistence_failed(ctx, &e).await;
        }

        self.recompute(ctx).await;
        self.broadcaster.publish(EventPayload::VariantStarted {
            job_id: ctx.job_id,
            variant_id: variant.id,
            profile: variant.profile.name.clone(),
        });
    }

    async fn variant_progress(&self, ctx: &JobContext, variant: &Variant, progress: ProgressEvent) {
        self.broadcaster.publish(EventPayload::Progress {
            job_id: ctx.job_id,
            variant_id: variant.id,
            profile: variant.profile.name.clone(),
            progress_percent: progress.progress_percent,
            current_time_seconds: progress.current_time_seconds,
            total_duration_seconds: progress.total_duration_seconds,
            eta_seconds: progress.eta_seconds,
        });

        let update = VariantUpdate::progress(progress.progress_percent, progress.current_time_seconds);
        let written = retry_transient(&self.retry, "write progress", || {
            self.store.update_variant(variant.id, &update)
        })
        .await;
        if let Err(e) = written {
            tracing::warn!(
                job_id = %ctx.job_id,
                variant_id = %variant.id,
                error = %e,
                "Dropping progress update"
            );
        }
    }

    async fn finish_variant(&self, ctx: &JobContext, variant: &Variant, result: Result<String>) {
        let profile = variant.profile.name.clone();
        let (update, payload) = match result {
            Ok(output_ref) => {
                tracing::info!(job_id = %ctx.job_id, variant_id = %variant.id, profile = %profile, "Variant completed");
                (
                    VariantUpdate::completed(&output_ref),
                    EventPayload::VariantCompleted {
                        job_id: ctx.job_id,
                        variant_id: variant.id,
                        profile,
                        output_ref,
                    },
                )
            }
            Err(e) => {
                let (reason, exit_code) = failure_reason(&e);
                tracing::warn!(job_id = %ctx.job_id, variant_id = %variant.id, profile = %profile, reason = %reason, "Variant failed");
                (
                    VariantUpdate::failed(&reason, exit_code),
                    EventPayload::VariantError {
                        job_id: ctx.job_id,
                        variant_id: variant.id,
                        profile,
                        error: reason,
                    },
                )
            }
        };

        let written = retry_transient(&self.retry, "finish variant", || {
            self.store.update_variant(variant.id, &update)
        })
        .await;
        match written {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(variant_id = %variant.id, "Variant was already terminal");
            }
            Err(e) => self.persistence_failed(ctx, &e).await,
        }

        self.recompute(ctx).await;
        self.broadcaster.publish(payload);
    }

    /// Recompute the job status from its stored variants and persist it if
    /// it changed.
    async fn recompute(&self, ctx: &JobContext) {
        let mut aggregate = ctx.aggregate.lock().await;
        if aggregate.status.is_terminal() {
            return;
        }

        let jwv = match retry_transient(&self.retry, "read job", || {
            self.store.get_job_with_variants(ctx.job_id)
        })
        .await
        {
            Ok(jwv) => jwv,
            Err(e) => {
                tracing::error!(job_id = %ctx.job_id, error = %e, "Cannot recompute job status");
                return;
            }
        };

        let next = jwv.aggregate_status();
        if next == aggregate.status {
            return;
        }

        let error = jwv.first_error();
        let update = JobUpdate::status(next, error.clone());
        let written = retry_transient(&self.retry, "update job", || {
            self.store.update_job(ctx.job_id, &update)
        })
        .await;
        if let Err(e) = written {
            self.force_error(ctx.job_id, &mut aggregate, &e).await;
            return;
        }

        tracing::info!(job_id = %ctx.job_id, from = %aggregate.status, to = %next, "Job status changed");
        aggregate.status = next;
        aggregate.error = update.error_message;

        if next == Status::Processing {
            self.broadcaster
                .publish(EventPayload::JobProcessing { job_id: ctx.job_id });
        }
    }

    /// A lifecycle write ran out of retries: the job becomes `error`.
    async fn persistence_failed(&self, ctx: &JobContext, err: &Error) {
        let mut aggregate = ctx.aggregate.lock().await;
        self.force_error(ctx.job_id, &mut aggregate, err).await;
    }

    async fn force_error(&self, job_id: JobId, aggregate: &mut Aggregate, err: &Error) {
        if aggregate.status.is_terminal() {
            return;
        }
        let message = format!("persistence failure: {err}");
        tracing::error!(job_id = %job_id, error = %err, "Failing job after persistence failure");

        let update = JobUpdate::status(Status::Error, Some(message.clone()));
        if let Err(e) = retry_transient(&self.retry, "fail job", || {
            self.store.update_job(job_id, &update)
        })
        .await
        {
            tracing::error!(job_id = %job_id, error = %e, "Could not record job failure");
        }

        aggregate.status = Status::Error;
        aggregate.error = Some(message);
    }

    /// Every variant is terminal: publish the job's terminal event once and
    /// schedule subscriber teardown.
    async fn finish_job(&self, ctx: &JobContext) {
        self.recompute(ctx).await;

        let (status, error) = {
            let mut aggregate = ctx.aggregate.lock().await;
            if !aggregate.status.is_terminal() {
                let err = Error::Internal("job status could not be recomputed".into());
                self.force_error(ctx.job_id, &mut aggregate, &err).await;
            }
            (aggregate.status, aggregate.error.clone())
        };

        self.active.remove(&ctx.job_id);

        let payload = match status {
            Status::Completed => EventPayload::JobCompleted { job_id: ctx.job_id },
            _ => EventPayload::JobError {
                job_id: ctx.job_id,
                error: error.unwrap_or_else(|| "unknown error".into()),
            },
        };
        self.broadcaster.publish(payload);
        self.broadcaster.schedule_teardown(ctx.job_id, self.grace);

        tracing::info!(job_id = %ctx.job_id, status = %status, "Job finished");
    }
}

/// Reason and exit code recorded on a failed variant.
fn failure_reason(err: &Error) -> (String, Option<i32>) {
    match err {
        Error::Process { code, .. } => (describe_exit(*code), *code),
        Error::Cancelled => ("cancelled".to_string(), None),
        other => (other.to_string(), None),
    }
}
