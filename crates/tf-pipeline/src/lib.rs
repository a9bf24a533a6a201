//! tf-pipeline: job submission and variant supervision.
//!
//! [`JobOrchestrator`] ties the encoder, the durable store and the live
//! broadcaster together. Lifecycle writes go through [`retry_transient`].

pub mod orchestrator;
pub mod retry;

pub use orchestrator::{JobOrchestrator, OrchestratorOptions};
pub use retry::{retry_transient, RetryConfig};
