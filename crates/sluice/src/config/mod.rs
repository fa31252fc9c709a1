//! Configuration for a migration run.
//!
//! Loaded from YAML with `${VAR}` style environment interpolation:
//!
//! ```yaml
//! source:
//!   uri: s3://export-bucket/AWSDynamoDB/01652208807592-ac14d3c7/data
//!   storage_options:
//!     aws_region: us-east-1
//! destination:
//!   uri: gs://staging-bucket/loads
//!   dataset: ${DATASET:-analytics}
//! run:
//!   batch_size: 10
//!   exclude_tables: [rulecollection_state]
//! metrics:
//!   textfile_path: /var/lib/node_exporter/sluice.prom
//! ```

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use sluice_core::config::interpolate_with;
use sluice_core::error::{InvalidTimestampSnafu, ReadFileSnafu, YamlParseSnafu};
use sluice_core::{LogFormat, MetricsConfig};

use crate::error::ConfigError;
use crate::schema::LegacyDateParser;
use crate::schema::dates::default_legacy_timezone;
use crate::sink::LoadOptions;
use crate::source::CompressionFormat;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Where the export shards are read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Shard location: `s3://bucket/prefix`, `gs://bucket/prefix` or a local path.
    pub uri: String,
    /// Storage options (credentials, region, endpoint).
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
    #[serde(default)]
    pub compression: CompressionFormat,
    /// Lines buffered between the decompressor and the pipeline.
    #[serde(default = "default_line_buffer")]
    pub line_buffer: usize,
}

fn default_line_buffer() -> usize {
    1024
}

/// Where load jobs are staged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationConfig {
    pub uri: String,
    pub dataset: String,
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
    #[serde(default)]
    pub load: LoadOptions,
    /// Rows buffered per table before writes wait for the load job.
    #[serde(default = "default_stream_capacity")]
    pub stream_capacity: usize,
    /// Staged row files roll at this size.
    #[serde(default = "default_file_size_mb")]
    pub file_size_mb: usize,
}

fn default_stream_capacity() -> usize {
    512
}

fn default_file_size_mb() -> usize {
    64
}

/// What to do when load jobs in a window fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkFailurePolicy {
    /// Log the failures and carry on with the next window.
    #[default]
    Continue,
    /// Stop the run once the window has settled.
    Abort,
}

/// Routing and cleaning options for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Shards per batch window. Unset means a single window for the whole run.
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// When non-empty, only these tables are loaded.
    #[serde(default)]
    pub include_tables: Vec<String>,
    #[serde(default = "default_exclude_tables")]
    pub exclude_tables: Vec<String>,
    /// RFC 3339 timestamp stamped on every row instead of the shard's
    /// last-modified time.
    #[serde(default)]
    pub timestamp_override: Option<String>,
    #[serde(default)]
    pub keep_empty_strings: bool,
    #[serde(default)]
    pub on_sink_failure: SinkFailurePolicy,
    /// IANA zone legacy date strings were recorded in.
    #[serde(default = "default_legacy_timezone")]
    pub legacy_timezone: String,
}

fn default_exclude_tables() -> Vec<String> {
    vec!["rulecollection_state".to_string()]
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            include_tables: Vec::new(),
            exclude_tables: default_exclude_tables(),
            timestamp_override: None,
            keep_empty_strings: false,
            on_sink_failure: SinkFailurePolicy::default(),
            legacy_timezone: default_legacy_timezone(),
        }
    }
}

impl RunConfig {
    /// The parsed timestamp override, if any.
    pub fn timestamp_override(&self) -> Result<Option<DateTime<Utc>>, ConfigError> {
        self.timestamp_override
            .as_deref()
            .map(|value| {
                DateTime::parse_from_rfc3339(value)
                    .map(|ts| ts.with_timezone(&Utc))
                    .context(InvalidTimestampSnafu { value })
            })
            .transpose()
    }

    pub fn legacy_date_parser(&self) -> Result<LegacyDateParser, ConfigError> {
        LegacyDateParser::for_zone(&self.legacy_timezone)
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, interpolating the process environment.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Self::parse_with(contents, |name| std::env::var(name).ok())
    }

    /// Parse configuration, resolving variables through `lookup`.
    pub fn parse_with<F>(contents: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let result = interpolate_with(contents, lookup);
        if !result.is_ok() {
            return Err(ConfigError::EnvInterpolation {
                message: result.errors.join("\n"),
            });
        }

        let config: Config = serde_yaml::from_str(&result.text).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.uri.trim().is_empty() {
            return Err(ConfigError::EmptySourceUri);
        }
        if self.destination.uri.trim().is_empty() {
            return Err(ConfigError::EmptyDestinationUri);
        }
        if self.destination.dataset.trim().is_empty() {
            return Err(ConfigError::EmptyDataset);
        }
        if self.run.batch_size == Some(0) {
            return Err(ConfigError::ZeroBatchSize);
        }
        for (field, value) in [
            ("source.line_buffer", self.source.line_buffer),
            ("destination.stream_capacity", self.destination.stream_capacity),
            ("destination.file_size_mb", self.destination.file_size_mb),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroCapacity { field });
            }
        }
        if let Some(table) = self
            .run
            .include_tables
            .iter()
            .find(|t| self.run.exclude_tables.contains(t))
        {
            return Err(ConfigError::TableFilterConflict {
                table: table.clone(),
            });
        }
        self.run.timestamp_override()?;
        self.run.legacy_date_parser()?;
        Ok(())
    }
}
