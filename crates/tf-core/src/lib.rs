//! tf-core: shared types, IDs, errors, configuration, and live event fan-out.
//!
//! This crate is the foundational dependency for all other tf-* crates,
//! providing type-safe identifiers, the job/variant data model with its
//! status aggregation, the profile table, a unified error type, application
//! configuration, and the per-job progress broadcaster.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod job;
pub mod profile;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use job::{aggregate_status, progress_percent, Job, JobWithVariants, Status, Variant};
pub use profile::{Profile, ProfileTable};
