//! Durable-state failure handling and crash recovery.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tf_av::{KnownDuration, VariantEncoder};
use tf_core::config::{Config, EncodingConfig};
use tf_core::events::ProgressBroadcaster;
use tf_core::{Error, Job, JobId, JobWithVariants, ProfileTable, Result, Status, Variant, VariantId};
use tf_db::{init_memory_pool, JobUpdate, SqliteStateStore, StateStore, VariantUpdate};
use tf_pipeline::{JobOrchestrator, OrchestratorOptions, RetryConfig};
use transforge::AppContext;

/// Store whose terminal variant writes fail a configurable number of times.
struct FlakyStore {
    inner: SqliteStateStore,
    /// Failures left before terminal writes start succeeding.
    failures_left: AtomicU32,
    attempts: AtomicU32,
    /// Every variant insert fails.
    reject_variants: bool,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            inner: SqliteStateStore::new(init_memory_pool().unwrap()),
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
            reject_variants: false,
        }
    }

    fn rejecting_variants() -> Self {
        Self {
            reject_variants: true,
            ..Self::new(0)
        }
    }
}

impl StateStore for FlakyStore {
    fn create_job(&self, job: &Job) -> Result<()> {
        self.inner.create_job(job)
    }

    fn create_variant(&self, variant: &Variant) -> Result<()> {
        if self.reject_variants {
            return Err(Error::database("database is locked"));
        }
        self.inner.create_variant(variant)
    }

    fn update_variant(&self, id: VariantId, update: &VariantUpdate) -> Result<bool> {
        if update.status.is_some_and(|s| s.is_terminal()) {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(Error::database("disk I/O error"));
            }
        }
        self.inner.update_variant(id, update)
    }

    fn update_job(&self, id: JobId, update: &JobUpdate) -> Result<bool> {
        self.inner.update_job(id, update)
    }

    fn get_job_with_variants(&self, id: JobId) -> Result<JobWithVariants> {
        self.inner.get_job_with_variants(id)
    }

    fn list_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        self.inner.list_jobs(limit)
    }

    fn recover_interrupted(&self) -> Result<Vec<JobId>> {
        self.inner.recover_interrupted()
    }
}

#[cfg(unix)]
fn orchestrator(
    store: Arc<FlakyStore>,
    transcoder: &common::FakeTranscoder,
    output_dir: &std::path::Path,
) -> JobOrchestrator {
    JobOrchestrator::new(
        store,
        Arc::new(ProgressBroadcaster::default()),
        VariantEncoder::new(
            transcoder.path().to_path_buf(),
            EncodingConfig::default(),
            ProfileTable::default(),
        ),
        Arc::new(KnownDuration(Some(60.0))),
        OrchestratorOptions {
            output_dir: output_dir.to_path_buf(),
            max_concurrent_variants: 4,
            subscriber_grace: Duration::from_millis(50),
            retry: RetryConfig::default()
                .with_max_retries(2)
                .with_base_delay(Duration::from_millis(1)),
        },
    )
}

#[cfg(unix)]
#[tokio::test]
async fn transient_write_failures_are_retried() {
    use common::{events_until_done, profiles, wait_for_job, Behavior, FakeTranscoder};

    let transcoder = FakeTranscoder::new(&[(480, Behavior::exit(0))]);
    let store = Arc::new(FlakyStore::new(2));
    let out = tempfile::tempdir().unwrap();
    let orch = orchestrator(Arc::clone(&store), &transcoder, out.path());

    let (job, mut sub) = orch
        .submit_subscribed("/media/in.mp4", &profiles(&["480p"]), None)
        .await
        .unwrap();
    events_until_done(&mut sub).await;

    let state = wait_for_job(&orch, job.id).await;
    assert_eq!(state.job.status, Status::Completed);
    assert_eq!(state.variants[0].status, Status::Completed);
    assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
}

#[cfg(unix)]
#[tokio::test]
async fn exhausted_retries_fail_the_job() {
    use common::{events_until_done, profiles, wait_for_job, Behavior, FakeTranscoder};
    use tf_core::events::EventPayload;

    let transcoder = FakeTranscoder::new(&[(480, Behavior::exit(0))]);
    let store = Arc::new(FlakyStore::new(u32::MAX));
    let out = tempfile::tempdir().unwrap();
    let orch = orchestrator(Arc::clone(&store), &transcoder, out.path());

    let (job, mut sub) = orch
        .submit_subscribed("/media/in.mp4", &profiles(&["480p"]), None)
        .await
        .unwrap();
    let events = events_until_done(&mut sub).await;

    match &events.last().unwrap().payload {
        EventPayload::JobError { error, .. } => {
            assert!(error.starts_with("persistence failure:"), "got {error}")
        }
        other => panic!("expected job:error, got {other:?}"),
    }

    let state = wait_for_job(&orch, job.id).await;
    assert_eq!(state.job.status, Status::Error);
    assert!(state
        .job
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("persistence failure:"));
    // One attempt plus two retries.
    assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn failed_variant_insert_marks_job_error() {
    let store = Arc::new(FlakyStore::rejecting_variants());
    let out = tempfile::tempdir().unwrap();
    let orch = JobOrchestrator::new(
        Arc::clone(&store) as Arc<dyn StateStore>,
        Arc::new(ProgressBroadcaster::default()),
        VariantEncoder::new(
            "nonexistent_ffmpeg_xyz".into(),
            EncodingConfig::default(),
            ProfileTable::default(),
        ),
        Arc::new(KnownDuration(Some(60.0))),
        OrchestratorOptions {
            output_dir: out.path().to_path_buf(),
            max_concurrent_variants: 1,
            subscriber_grace: Duration::from_millis(10),
            retry: RetryConfig::default()
                .with_max_retries(1)
                .with_base_delay(Duration::from_millis(1)),
        },
    );

    let err = orch
        .submit("/media/in.mp4", &["480p".to_string()], None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Persistence { .. }), "got {err:?}");

    let jobs = orch.list(10).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, Status::Error);
    assert!(jobs[0]
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("persistence failure:"));
    assert!(!orch.is_active(jobs[0].id));
}

#[tokio::test]
async fn startup_recovery_fails_interrupted_variants() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.db_path = dir.path().join("state").join("transforge.db");
    config.storage.output_dir = dir.path().join("outputs");

    // Simulate a process that died mid-encode.
    let job_id = {
        let ctx = AppContext::open(config.clone()).unwrap();
        let store = SqliteStateStore::new(ctx.db.clone());
        let table = ProfileTable::default();
        let mut job = Job::new("/media/in.mp4", vec!["480p".into(), "720p".into()]);
        let done = Variant::new(job.id, table.get("480p").unwrap().clone());
        let running = Variant::new(job.id, table.get("720p").unwrap().clone());
        job.variants = vec![done.id, running.id];
        store.create_job(&job).unwrap();
        store.create_variant(&done).unwrap();
        store.create_variant(&running).unwrap();
        store
            .update_variant(done.id, &VariantUpdate::completed("/out/480p.mp4"))
            .unwrap();
        store
            .update_variant(running.id, &VariantUpdate::started(Some(60.0)))
            .unwrap();
        store
            .update_job(job.id, &JobUpdate::status(Status::Processing, None))
            .unwrap();
        job.id
    };

    let ctx = AppContext::open(config).unwrap();
    ctx.recover().await.unwrap();

    let state = ctx.orchestrator.job(job_id).await.unwrap();
    assert_eq!(state.job.status, Status::Error);
    assert_eq!(state.job.error_message.as_deref(), Some("720p: interrupted"));
    assert_eq!(state.variants[0].status, Status::Completed);
    assert_eq!(state.variants[1].status, Status::Error);
    assert_eq!(state.variants[1].error_message.as_deref(), Some("interrupted"));
}
