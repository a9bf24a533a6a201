//! Variant Encoder: one transcoder process for one (input, profile) pair.
//!
//! [`VariantEncoder::start`] resolves the profile, spawns a task that owns
//! the child process and returns an [`EncoderRun`]. The task selects over the
//! child's stdout (progress), its stderr (diagnostics, logged only) and the
//! cancellation token, so a single unit of work decides every outcome. The
//! event channel closes before the terminal result becomes available.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use tf_core::config::EncodingConfig;
use tf_core::{progress_percent, Error, Profile, ProfileTable, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::progress::{ProgressParser, ProgressRecord};

const EVENT_BUFFER: usize = 32;
const READ_CHUNK: usize = 8 * 1024;

/// What to encode and where.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub input: PathBuf,
    /// Profile name, resolved against the encoder's profile table.
    pub profile: String,
    pub output: PathBuf,
    /// Total source duration. Without it no progress is reported.
    pub duration_seconds: Option<f64>,
}

/// A throttled progress update for one variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Clamped to `[0, 100]`; never decreases within one run.
    pub progress_percent: f64,
    pub current_time_seconds: f64,
    pub total_duration_seconds: f64,
    pub eta_seconds: Option<f64>,
    pub speed: Option<f64>,
    pub fps: Option<f64>,
}

/// Non-terminal events from a running encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderEvent {
    /// The process was spawned. Never sent if spawning failed.
    Started { pid: Option<u32> },
    Progress(ProgressEvent),
}

/// Handle to a running encode.
///
/// Drain `events` until it yields `None`, then call [`EncoderRun::wait`] for
/// the terminal result: the output reference, or one of
/// [`Error::Spawn`], [`Error::Process`], [`Error::Cancelled`].
pub struct EncoderRun {
    pub events: mpsc::Receiver<EncoderEvent>,
    outcome: JoinHandle<Result<String>>,
}

impl EncoderRun {
    /// Wait for the terminal result. Undelivered events are discarded.
    pub async fn wait(self) -> Result<String> {
        let EncoderRun { events, outcome } = self;
        drop(events);
        match outcome.await {
            Ok(result) => result,
            Err(e) => Err(Error::Internal(format!("encoder task failed: {e}"))),
        }
    }
}

/// Builds and runs transcoder invocations for the profiles in its table.
#[derive(Debug, Clone)]
pub struct VariantEncoder {
    program: PathBuf,
    encoding: EncodingConfig,
    profiles: ProfileTable,
    threshold_pct: f64,
}

impl VariantEncoder {
    pub fn new(program: PathBuf, encoding: EncodingConfig, profiles: ProfileTable) -> Self {
        Self {
            program,
            encoding,
            profiles,
            threshold_pct: 1.0,
        }
    }

    /// Minimum advance in percentage points between progress events.
    pub fn with_threshold(mut self, pct: f64) -> Self {
        self.threshold_pct = pct.max(0.0);
        self
    }

    pub fn profiles(&self) -> &ProfileTable {
        &self.profiles
    }

    /// Transcoder arguments for one profile. Progress goes to stdout as
    /// `key=value` blocks; the periodic stats line is disabled.
    pub fn build_args(&self, input: &Path, profile: &Profile, output: &Path) -> Vec<String> {
        let enc = &self.encoding;
        let mut args: Vec<String> = ["-hide_banner", "-y", "-nostats", "-progress", "pipe:1", "-i"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(input.to_string_lossy().to_string());
        args.extend(
            [
                "-vf".to_string(),
                format!("scale=-2:{}", profile.height),
                "-c:v".to_string(),
                enc.video_codec.clone(),
                "-b:v".to_string(),
                profile.bitrate.clone(),
                "-preset".to_string(),
                enc.video_preset.clone(),
                "-c:a".to_string(),
                enc.audio_codec.clone(),
                "-b:a".to_string(),
                enc.audio_bitrate.clone(),
                "-movflags".to_string(),
                "+faststart".to_string(),
            ],
        );
        args.push(output.to_string_lossy().to_string());
        args
    }

    /// Start encoding `request` on a new task.
    ///
    /// An unknown profile fails here with [`Error::Configuration`] and no
    /// process is spawned. Every other failure arrives through
    /// [`EncoderRun::wait`]. Must be called within a tokio runtime.
    pub fn start(&self, request: EncodeRequest, cancel: CancellationToken) -> Result<EncoderRun> {
        let profile = self.profiles.get(&request.profile)?.clone();
        let args = self.build_args(&request.input, &profile, &request.output);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let process = Process {
            program: self.program.clone(),
            args,
            profile: profile.name,
            output: request.output,
            tracker: ProgressTracker::new(request.duration_seconds, self.threshold_pct),
        };
        let outcome = tokio::spawn(process.run(tx, cancel));

        Ok(EncoderRun { events: rx, outcome })
    }
}

/// Everything the encoder task owns.
struct Process {
    program: PathBuf,
    args: Vec<String>,
    profile: String,
    output: PathBuf,
    tracker: ProgressTracker,
}

impl Process {
    fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    async fn run(
        mut self,
        events: mpsc::Sender<EncoderEvent>,
        cancel: CancellationToken,
    ) -> Result<String> {
        let profile = self.profile.clone();

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if let Some(parent) = self.output.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::spawn(
                    self.tool_name(),
                    format!("cannot create output directory {}: {e}", parent.display()),
                )
            })?;
        }

        tracing::debug!(profile = %profile, "Running {} {}", self.program.display(), self.args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::spawn(self.tool_name(), e.to_string()))?;

        let pid = child.id();
        tracing::info!(profile = %profile, pid = ?pid, "Transcoder started");
        let _ = events.send(EncoderEvent::Started { pid }).await;

        let (Some(mut stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill().await;
            return Err(Error::Internal("transcoder pipes were not captured".into()));
        };
        let mut stderr_lines = BufReader::new(stderr).lines();
        let mut parser = ProgressParser::new();
        let mut buf = vec![0u8; READ_CHUNK];
        let (mut stdout_open, mut stderr_open) = (true, true);

        let status = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    // Only a running process is killed; an exit already seen keeps its status.
                    if let Ok(Some(exit)) = child.try_wait() {
                        break Ok(exit);
                    }
                    tracing::info!(profile = %profile, pid = ?pid, "Cancelling transcoder");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(profile = %profile, error = %e, "Failed to kill transcoder");
                    }
                    return Err(Error::Cancelled);
                }

                read = stdout.read(&mut buf), if stdout_open => match read {
                    Ok(0) => {
                        stdout_open = false;
                        if let Some(record) = parser.finish() {
                            self.forward(&record, &events).await;
                        }
                    }
                    Ok(n) => {
                        for record in parser.feed(&buf[..n]) {
                            self.forward(&record, &events).await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(profile = %profile, error = %e, "Failed to read transcoder stdout");
                        stdout_open = false;
                    }
                },

                line = stderr_lines.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => tracing::debug!(profile = %profile, "{line}"),
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        tracing::debug!(profile = %profile, error = %e, "Failed to read transcoder stderr");
                        stderr_open = false;
                    }
                },

                status = child.wait(), if !stdout_open && !stderr_open => break status,
            }
        };

        let status = status?;
        if status.success() {
            let output_ref = self.output.to_string_lossy().to_string();
            tracing::info!(profile = %profile, output = %output_ref, "Transcoder finished");
            Ok(output_ref)
        } else {
            tracing::warn!(profile = %profile, code = ?status.code(), "Transcoder failed");
            Err(Error::Process {
                profile,
                code: status.code(),
            })
        }
    }

    async fn forward(&mut self, record: &ProgressRecord, events: &mpsc::Sender<EncoderEvent>) {
        if let Some(event) = self.tracker.observe(record) {
            let _ = events.send(EncoderEvent::Progress(event)).await;
        }
    }
}

/// Turns parsed records into throttled, non-decreasing progress events.
#[derive(Debug)]
struct ProgressTracker {
    total: Option<f64>,
    threshold: f64,
    last: Option<f64>,
    started: Instant,
}

impl ProgressTracker {
    fn new(total: Option<f64>, threshold: f64) -> Self {
        Self {
            total,
            threshold,
            last: None,
            started: Instant::now(),
        }
    }

    fn observe(&mut self, record: &ProgressRecord) -> Option<ProgressEvent> {
        let total = self.total?;
        let pct = progress_percent(record.out_time_seconds, Some(total))?;

        let advance = match self.last {
            None => true,
            Some(last) => pct > last && (pct - last >= self.threshold || pct >= 100.0),
        };
        if !advance {
            return None;
        }
        self.last = Some(pct);

        let current = record.out_time_seconds.clamp(0.0, total);
        Some(ProgressEvent {
            progress_percent: pct,
            current_time_seconds: current,
            total_duration_seconds: total,
            eta_seconds: self.eta(pct, total - current, record.speed),
            speed: record.speed,
            fps: record.fps,
        })
    }

    /// Remaining media time over encode speed when known, otherwise the wall
    /// clock rate so far.
    fn eta(&self, pct: f64, remaining_media: f64, speed: Option<f64>) -> Option<f64> {
        if let Some(speed) = speed {
            return Some(remaining_media / speed);
        }
        if pct <= 0.0 {
            return None;
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        Some(elapsed * (100.0 - pct) / pct)
    }
}
