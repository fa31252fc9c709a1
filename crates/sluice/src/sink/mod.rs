//! Per-table load streams and the batch window that owns them.
//!
//! - `traits`: the [`Warehouse`] seam and load stream/job types
//! - `table`: [`TableSink`], one open load stream with its evolving schema
//! - `window`: [`BatchWindow`], the sinks opened between two drain barriers
//! - `staging`: [`StagingWarehouse`], load jobs staged as NDJSON in object storage

pub mod staging;
pub mod table;
pub mod traits;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

pub use staging::StagingWarehouse;
pub use table::{SinkReport, SinkState, TableSink, WriteOutcome};
pub use traits::{LoadChunk, LoadJob, LoadJobStats, LoadOptions, LoadRequest, LoadStream, Warehouse};
pub use window::{BatchWindow, SinkSettings, WindowReport};
