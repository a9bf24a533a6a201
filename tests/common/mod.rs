//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds a full [`AppContext`] over an
//! in-memory database, and [`FakeTranscoder`], which writes a shell script
//! standing in for ffmpeg. The script picks its behavior from the
//! `scale=-2:<height>` filter in its arguments.

#![allow(dead_code)]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use tf_av::{DurationProbe, KnownDuration, ToolRegistry};
use tf_core::config::Config;
use tf_core::events::{Event, EventPayload, Subscription};
use tf_core::{JobId, JobWithVariants};
use tf_db::{init_memory_pool, DbPool};
use tf_pipeline::JobOrchestrator;
use transforge::AppContext;

/// Test harness wrapping a fully-constructed [`AppContext`] backed by an
/// in-memory database.
pub struct TestHarness {
    pub ctx: AppContext,
    pub db: DbPool,
    pub dir: TempDir,
}

impl TestHarness {
    /// Harness whose transcoder is `transcoder` and whose sources are 60s long.
    pub fn new(transcoder: &FakeTranscoder) -> Self {
        Self::with(transcoder, Config::default(), KnownDuration(Some(60.0)))
    }

    /// Harness with a custom configuration and duration probe.
    pub fn with(
        transcoder: &FakeTranscoder,
        mut config: Config,
        probe: impl DurationProbe + 'static,
    ) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        config.tools.ffmpeg_path = Some(transcoder.path().to_path_buf());
        config.storage.output_dir = dir.path().join("outputs");
        config.pipeline.subscriber_grace_secs = 1;
        config.pipeline.persistence_retry_base_ms = 1;

        let db = init_memory_pool().expect("failed to create in-memory pool");
        let tools = Arc::new(ToolRegistry::discover(&config.tools));
        let probe: Arc<dyn DurationProbe> = Arc::new(probe);
        let ctx = AppContext::build(config, db.clone(), tools, probe);

        Self { ctx, db, dir }
    }

    pub fn orchestrator(&self) -> &JobOrchestrator {
        &self.ctx.orchestrator
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("outputs")
    }
}

/// Profile names as owned strings.
pub fn profiles(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Receive events until the job's terminal event (inclusive).
pub async fn events_until_done(sub: &mut Subscription) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(20), sub.recv())
            .await
            .expect("timed out waiting for job events")
            .expect("subscription closed before the job finished");
        let done = event.payload.is_job_terminal();
        events.push(event);
        if done {
            return events;
        }
    }
}

/// Receive events until `pred` matches one (inclusive).
pub async fn events_until(
    sub: &mut Subscription,
    mut pred: impl FnMut(&EventPayload) -> bool,
) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(20), sub.recv())
            .await
            .expect("timed out waiting for event")
            .expect("subscription closed early");
        let hit = pred(&event.payload);
        events.push(event);
        if hit {
            return events;
        }
    }
}

/// Poll the store until the job is no longer supervised.
pub async fn wait_for_job(orchestrator: &JobOrchestrator, id: JobId) -> JobWithVariants {
    tokio::time::timeout(Duration::from_secs(20), async {
        while orchestrator.is_active(id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not finish in time");
    orchestrator.job(id).await.expect("job should exist")
}

/// Wire type of each event, in order.
pub fn kinds(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .map(|e| {
            serde_json::to_value(e).expect("event serializes")["type"]
                .as_str()
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}

/// Shell script standing in for ffmpeg.
pub struct FakeTranscoder {
    _dir: TempDir,
    path: PathBuf,
}

/// What the fake transcoder does for one output height.
pub enum Behavior {
    /// Write progress records (`out_time_ms` values) then exit with `code`.
    Progress { out_time_ms: Vec<u64>, code: i32 },
    /// Write progress records then block until killed.
    Hang { out_time_ms: Vec<u64> },
}

impl Behavior {
    pub fn exit(code: i32) -> Self {
        Behavior::Progress {
            out_time_ms: Vec::new(),
            code,
        }
    }

    fn render(&self, out: &mut String) {
        let records = match self {
            Behavior::Progress { out_time_ms, .. } | Behavior::Hang { out_time_ms } => {
                out_time_ms
            }
        };
        for t in records {
            let _ = writeln!(out, "    printf 'frame=1\\nout_time_ms={t}\\nspeed=2.0x\\nprogress=continue\\n'");
        }
        match self {
            Behavior::Progress { code, .. } => {
                if *code == 0 {
                    out.push_str("    printf 'progress=end\\n'\n");
                } else {
                    out.push_str("    echo 'Conversion failed!' >&2\n");
                }
                let _ = writeln!(out, "    exit {code}");
            }
            Behavior::Hang { .. } => out.push_str("    exec sleep 30\n"),
        }
    }
}

impl FakeTranscoder {
    /// Build a script dispatching on output height. Unlisted heights exit 0.
    pub fn new(cases: &[(u32, Behavior)]) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("ffmpeg");

        let mut script = String::from("#!/bin/sh\ncase \"$*\" in\n");
        for (height, behavior) in cases {
            let _ = writeln!(script, "  *scale=-2:{height}\\ *)");
            behavior.render(&mut script);
            script.push_str("    ;;\n");
        }
        script.push_str("esac\nexit 0\n");

        write_executable(&path, &script);
        Self { _dir: dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn write_executable(path: &Path, contents: &str) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, contents).expect("failed to write script");
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .expect("failed to chmod script");
}

#[cfg(not(unix))]
fn write_executable(path: &Path, contents: &str) {
    std::fs::write(path, contents).expect("failed to write script");
}
