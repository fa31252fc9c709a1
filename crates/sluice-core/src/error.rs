//! Error types shared by the sluice crates.

use std::path::PathBuf;

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// The storage URL could not be parsed.
    #[snafu(display("Invalid storage URL '{url}': {source}"))]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// IO error while preparing a local storage location.
    #[snafu(display("IO error on {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl StorageError {
    /// Check if this error represents a "not found" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::ObjectStore {
                source: object_store::Error::NotFound { .. }
            }
        )
    }
}

// ============ Config Errors ============

/// Errors that can occur while loading and validating configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("Source URI cannot be empty"))]
    EmptySourceUri,

    #[snafu(display("Destination URI cannot be empty"))]
    EmptyDestinationUri,

    #[snafu(display("Destination dataset cannot be empty"))]
    EmptyDataset,

    /// `run.batch_size` was set to zero.
    #[snafu(display("run.batch_size must be at least 1 when set"))]
    ZeroBatchSize,

    /// A capacity or size setting was zero.
    #[snafu(display("{field} must be greater than zero"))]
    ZeroCapacity { field: &'static str },

    /// The configured legacy date time zone is not an IANA zone name.
    #[snafu(display("Unknown time zone '{name}'"))]
    UnknownTimezone { name: String },

    /// The timestamp override is not RFC 3339.
    #[snafu(display("Invalid timestamp_override '{value}': {source}"))]
    InvalidTimestamp {
        value: String,
        source: chrono::ParseError,
    },

    /// A table appears in both the include and the exclude list.
    #[snafu(display("Table '{table}' is listed in both include_tables and exclude_tables"))]
    TableFilterConflict { table: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read the configuration file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ============ Metrics Errors ============

/// Errors that can occur while recording or exporting metrics.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to install the Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder: {source}"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Failed to write the metrics snapshot file.
    #[snafu(display("Failed to write metrics snapshot to {}: {source}", path.display()))]
    WriteSnapshot {
        path: PathBuf,
        source: std::io::Error,
    },
}
