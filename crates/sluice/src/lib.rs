//! Sluice: migrates a key/value table export into per-table warehouse loads.
//!
//! This crate handles:
//! - Streaming gzip NDJSON export shards from object storage, one line at a time
//! - Classifying each item into a destination table by its composite key
//! - Cleaning typed attribute values and inferring a column schema per record
//! - Wrapping rows in change envelopes and writing them to per-table load streams
//! - Batch windows that wait for every load job before the next batch starts

pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod schema;
pub mod sink;
pub mod source;

pub use cli::CliArgs;
pub use config::Config;
pub use error::PipelineError;
pub use pipeline::{Migration, MigrationStats, RunSettings, run_migration};

pub use sluice_core::{
    LogFormat, MetricsConfig, StorageProvider, StorageProviderRef, init_recorder, init_tracing,
};
