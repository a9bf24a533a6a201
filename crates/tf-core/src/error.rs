//! Unified error type for the transcoding pipeline.
//!
//! All crates funnel their failures into [`Error`]. The first five variants
//! are the pipeline's error taxonomy; the rest are supporting failures that
//! callers may see from lookups, I/O and configuration loading.

use std::fmt;

/// Unified error type covering all failure modes in transforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown or invalid output profile. Raised at submission, before any
    /// variant exists.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The external transcoder could not be launched.
    #[error("Spawn error [{tool}]: {message}")]
    Spawn {
        /// Name of the program that failed to start.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// The external transcoder exited unsuccessfully.
    #[error("Process error [{profile}]: {}", exit_reason(.code))]
    Process {
        /// Profile the process was encoding.
        profile: String,
        /// Exit code, or `None` if the process was killed by a signal.
        code: Option<i32>,
    },

    /// The variant was stopped on request.
    #[error("cancelled")]
    Cancelled,

    /// A durable write or read failed.
    #[error("Persistence error: {source}")]
    Persistence {
        /// The underlying store error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job", "variant").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A one-shot external tool (ffprobe) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn exit_reason(code: &Option<i32>) -> String {
    describe_exit(*code)
}

/// Render the reason recorded on a variant for a nonzero exit.
pub fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("process exited with code {code}"),
        None => "process terminated by signal".to_string(),
    }
}

impl Error {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Persistence { .. })
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Persistence`].
    pub fn database(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Persistence {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::Spawn`].
    pub fn spawn(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Spawn {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_display() {
        let err = Error::Configuration("unknown profile '4k'".into());
        assert_eq!(err.to_string(), "Configuration error: unknown profile '4k'");
    }

    #[test]
    fn process_display_includes_exit_code() {
        let err = Error::Process {
            profile: "720p".into(),
            code: Some(1),
        };
        assert_eq!(err.to_string(), "Process error [720p]: process exited with code 1");
    }

    #[test]
    fn process_display_signal() {
        let err = Error::Process {
            profile: "480p".into(),
            code: None,
        };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn cancelled_is_distinguishable() {
        assert_eq!(Error::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn only_persistence_is_transient() {
        assert!(Error::database("disk I/O error").is_transient());
        assert!(!Error::spawn("ffmpeg", "not found").is_transient());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn not_found_display() {
        let err = Error::not_found("job", "abc-123");
        assert_eq!(err.to_string(), "job not found: abc-123");
    }
}
