//! Database query modules.

pub mod jobs;
pub mod variants;
