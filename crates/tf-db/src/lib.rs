//! tf-db: durable state for jobs and variants.
//!
//! This crate provides SQLite-backed storage with connection pooling,
//! embedded migrations, row mapping and the [`StateStore`] interface the
//! orchestrator writes through.

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
pub mod store;

pub use pool::{get_conn, init_memory_pool, init_pool, DbPool};
pub use store::{JobUpdate, SqliteStateStore, StateStore, VariantUpdate};
