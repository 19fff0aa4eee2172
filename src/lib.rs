//! Azure cost data ingestion pipeline
//!
//! Extracts daily cost data from the Azure Cost Management Query API
//! across configured billing scopes and loads it into a partitioned
//! table (Postgres in production, CSV files locally). Writes are
//! idempotent merges keyed by a natural row key, so dates can be
//! re-processed and backfilled safely.

pub mod auth;
pub mod cli;
pub mod config;
pub mod extract;
pub mod pipeline;
pub mod schema;
pub mod storage;

pub use config::Settings;
pub use pipeline::{PipelineOrchestrator, RunResult};
pub use storage::WriteMode;
