//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for tools, storage, encoding and the pipeline. Every section
//! defaults sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::profile::{default_profiles, Profile, ProfileTable};
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub storage: StorageConfig,
    pub encoding: EncodingConfig,
    pub pipeline: PipelineConfig,
    #[serde(default = "default_profiles")]
    pub profiles: Vec<Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tools: ToolsConfig::default(),
            storage: StorageConfig::default(),
            encoding: EncodingConfig::default(),
            pipeline: PipelineConfig::default(),
            profiles: default_profiles(),
        }
    }
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    ///
    /// This is string-based so the caller can read the file however it
    /// sees fit.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Build the lookup table for the configured profiles.
    pub fn profile_table(&self) -> ProfileTable {
        ProfileTable::new(self.profiles.clone())
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.profiles.is_empty() {
            warnings.push("profiles is empty; every submission will be rejected".into());
        }

        for (i, p) in self.profiles.iter().enumerate() {
            if p.name.trim().is_empty() {
                warnings.push(format!("profiles[{i}].name is empty"));
            }
            if p.height == 0 {
                warnings.push(format!("profiles[{i}] ('{}') has height 0", p.name));
            }
            if p.bitrate.trim().is_empty() {
                warnings.push(format!("profiles[{i}] ('{}') has no bitrate", p.name));
            }
            if self.profiles[..i].iter().any(|q| q.name == p.name) {
                warnings.push(format!(
                    "profiles[{i}] duplicates profile name '{}'; the first entry wins",
                    p.name
                ));
            }
        }

        if self.pipeline.max_concurrent_variants == 0 {
            warnings.push(
                "pipeline.max_concurrent_variants is 0; it will be treated as 1".into(),
            );
        }

        if !(0.0..=100.0).contains(&self.pipeline.progress_threshold_pct) {
            warnings.push(format!(
                "pipeline.progress_threshold_pct {} is outside 0..=100",
                self.pipeline.progress_threshold_pct
            ));
        }

        if self.pipeline.subscriber_buffer == 0 {
            warnings.push("pipeline.subscriber_buffer is 0; it will be treated as 1".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Where durable state and variant outputs live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/transforge.db"),
            output_dir: PathBuf::from("./data/outputs"),
        }
    }
}

/// Codec settings shared by every profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    pub video_codec: String,
    pub video_preset: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            video_codec: "libx264".into(),
            video_preset: "veryfast".into(),
            audio_codec: "aac".into(),
            audio_bitrate: "128k".into(),
        }
    }
}

/// Orchestrator and broadcaster tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ceiling on transcoder processes running at once, across all jobs.
    pub max_concurrent_variants: usize,
    /// Minimum advance in percentage points between two progress events.
    pub progress_threshold_pct: f64,
    /// How long subscriptions stay open after a job finishes.
    pub subscriber_grace_secs: u64,
    /// Per-observer event buffer; events beyond it are dropped for that observer.
    pub subscriber_buffer: usize,
    /// Retries after the first failed durable write.
    pub persistence_retries: u32,
    /// Base delay for exponential backoff between write retries.
    pub persistence_retry_base_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_variants: 4,
            progress_threshold_pct: 1.0,
            subscriber_grace_secs: 30,
            subscriber_buffer: 64,
            persistence_retries: 3,
            persistence_retry_base_ms: 50,
        }
    }
}

impl PipelineConfig {
    pub fn subscriber_grace(&self) -> Duration {
        Duration::from_secs(self.subscriber_grace_secs)
    }

    pub fn persistence_retry_base(&self) -> Duration {
        Duration::from_millis(self.persistence_retry_base_ms)
    }
}
