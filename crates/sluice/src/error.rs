//! Error types for the sluice migration.

use snafu::prelude::*;

pub use sluice_core::error::{ConfigError, MetricsError, StorageError};

/// Errors raised while deriving a schema and cleaned value from a record.
///
/// All of these are skippable for the enclosing record.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PreprocessError {
    /// The value's type has no column representation.
    #[snafu(display("Can't generate schema for a '{tag}' value (key: {field})"))]
    UnsupportedType { field: String, tag: &'static str },

    /// A list mixes element types, e.g. numbers and records.
    #[snafu(display("Array cannot have mixed types (key: {field}, found {first} and {second})"))]
    MixedTypeArray {
        field: String,
        first: &'static str,
        second: &'static str,
    },

    /// The value nests deeper than the supported limit.
    #[snafu(display("Value nests deeper than {limit} levels (key: {field})"))]
    NestingTooDeep { field: String, limit: usize },

    /// The same column appears with two incompatible definitions.
    #[snafu(display("Field '{field}' is both {existing} and {incoming}"))]
    ConflictingFieldTypes {
        field: String,
        existing: String,
        incoming: String,
    },
}

/// Errors raised while turning an export line into a change envelope.
///
/// All of these are skippable for the enclosing record.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum NormalizeError {
    /// The line is not a JSON object of the expected shape.
    #[snafu(display("Malformed export line: {source}"))]
    MalformedLine { source: serde_json::Error },

    /// The item lacks one of its key attributes.
    #[snafu(display("Item has no string '{attribute}' attribute"))]
    MissingKey { attribute: &'static str },

    /// The item could not be preprocessed.
    #[snafu(display("Couldn't clean record (pk: {pk}, sk: {sk}): {source}"))]
    Clean {
        pk: String,
        sk: String,
        source: PreprocessError,
    },
}

impl NormalizeError {
    /// Short label used for the `reason` metric dimension.
    pub fn reason(&self) -> &'static str {
        match self {
            NormalizeError::MalformedLine { .. } => "malformed_line",
            NormalizeError::MissingKey { .. } => "missing_key",
            NormalizeError::Clean { .. } => "clean_failed",
        }
    }
}

/// Errors that can occur while reading a shard.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReaderError {
    /// The shard could not be decompressed.
    #[snafu(display("Failed to decompress {path}: {source}"))]
    Decompression {
        path: String,
        source: std::io::Error,
    },

    /// The blocking reader task panicked or was cancelled.
    #[snafu(display("Reader task failed for {path}: {source}"))]
    ReaderTask {
        path: String,
        source: tokio::task::JoinError,
    },
}

/// Errors raised by warehouse load streams and jobs.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// The destination refused to open a load stream.
    #[snafu(display("Failed to open load stream for {table}: {reason}"))]
    OpenStream { table: String, reason: String },

    /// Writing a load job artifact failed.
    #[snafu(display("Failed to write {location}: {source}"))]
    StagingWrite {
        location: String,
        source: StorageError,
    },

    /// The destination reported a failed load job.
    #[snafu(display("Load job for {table} failed: {reason}"))]
    JobFailed {
        table: String,
        reason: String,
        location: Option<String>,
    },

    /// A row or manifest could not be serialized.
    #[snafu(display("Failed to serialize load data: {source}"))]
    Serialize { source: serde_json::Error },

    /// The load stream stopped accepting rows before it was ended.
    #[snafu(display("Load stream for {table} closed unexpectedly"))]
    StreamClosed { table: String },

    /// The load job task went away without reporting an outcome.
    #[snafu(display("Load job for {table} was lost: {source}"))]
    JobLost {
        table: String,
        source: tokio::task::JoinError,
    },
}

impl SinkError {
    /// The object or table the failure refers to, when known.
    pub fn location(&self) -> Option<&str> {
        match self {
            SinkError::StagingWrite { location, .. } => Some(location),
            SinkError::JobFailed { location, table, .. } => {
                Some(location.as_deref().unwrap_or(table.as_str()))
            }
            SinkError::OpenStream { table, .. }
            | SinkError::StreamClosed { table }
            | SinkError::JobLost { table, .. } => Some(table),
            SinkError::Serialize { .. } => None,
        }
    }
}

/// Top-level pipeline errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Storage error while setting up the source or destination.
    #[snafu(display("Storage error: {source}"))]
    Storage { source: StorageError },

    /// Listing the source shards failed.
    #[snafu(display("Failed to list source shards: {source}"))]
    ListShards { source: StorageError },

    /// Fetching a shard failed.
    #[snafu(display("Failed to fetch shard {key}: {source}"))]
    FetchShard { key: String, source: StorageError },

    /// Reader error.
    #[snafu(display("Reader error: {source}"))]
    Reader { source: ReaderError },

    /// Load jobs failed and the run is configured to abort on sink failure.
    #[snafu(display("{failed} load job(s) failed in batch window {window}"))]
    LoadJobsFailed { window: usize, failed: usize },

    /// Metrics error.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<StorageError> for PipelineError {
    fn from(source: StorageError) -> Self {
        PipelineError::Storage { source }
    }
}

impl From<ReaderError> for PipelineError {
    fn from(source: ReaderError) -> Self {
        PipelineError::Reader { source }
    }
}

impl From<MetricsError> for PipelineError {
    fn from(source: MetricsError) -> Self {
        PipelineError::Metrics { source }
    }
}
