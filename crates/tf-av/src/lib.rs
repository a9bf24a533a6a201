//! # tf-av
//!
//! External transcoder integration for the transforge pipeline.
//!
//! This crate provides:
//!
//! - **Progress parsing** ([`ProgressParser`]) -- incremental decoding of
//!   ffmpeg `-progress` output split at arbitrary chunk boundaries.
//! - **Variant encoding** ([`VariantEncoder`]) -- one supervised transcoder
//!   process per (input, profile), with throttled progress and cancellation.
//! - **Tool discovery** ([`ToolRegistry`]) -- find ffmpeg and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- short external invocations
//!   with a timeout.
//! - **Duration probing** ([`DurationProbe`]) -- resolve the source duration
//!   progress is measured against.

pub mod command;
pub mod encoder;
pub mod probe;
pub mod progress;
pub mod tools;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use encoder::{EncodeRequest, EncoderEvent, EncoderRun, ProgressEvent, VariantEncoder};
pub use probe::{DurationProbe, FfprobeDurationProbe, KnownDuration};
pub use progress::{ProgressParser, ProgressRecord};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
