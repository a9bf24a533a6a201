//! Transforge - multi-profile media transcoding pipeline
//!
//! This library crate exposes the application wiring for the CLI and for
//! integration testing.

pub mod context;

pub use context::AppContext;
