//! Source duration discovery.
//!
//! Progress percentages need the total media duration. A [`DurationProbe`]
//! resolves it before encoding starts; `Ok(None)` means the duration is
//! unknown and no percentage will be reported.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tf_core::Result;

use crate::command::ToolCommand;

#[async_trait]
pub trait DurationProbe: Send + Sync {
    /// Duration of `input` in seconds, or `None` if it cannot be known.
    async fn duration(&self, input: &Path) -> Result<Option<f64>>;
}

/// A duration supplied up front by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct KnownDuration(pub Option<f64>);

#[async_trait]
impl DurationProbe for KnownDuration {
    async fn duration(&self, _input: &Path) -> Result<Option<f64>> {
        Ok(valid_duration(self.0))
    }
}

/// Reads `format=duration` with the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeDurationProbe {
    ffprobe_path: PathBuf,
    timeout: Duration,
}

impl FfprobeDurationProbe {
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self {
            ffprobe_path,
            timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl DurationProbe for FfprobeDurationProbe {
    async fn duration(&self, input: &Path) -> Result<Option<f64>> {
        let output = ToolCommand::new(self.ffprobe_path.clone())
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(input.to_string_lossy())
            .timeout(self.timeout)
            .execute()
            .await?;

        Ok(parse_duration(&output.stdout))
    }
}

/// Parse ffprobe's bare `format=duration` output. `N/A` yields `None`.
pub fn parse_duration(stdout: &str) -> Option<f64> {
    let first = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    valid_duration(first.parse::<f64>().ok())
}

fn valid_duration(secs: Option<f64>) -> Option<f64> {
    secs.filter(|d| d.is_finite() && *d > 0.0)
}
