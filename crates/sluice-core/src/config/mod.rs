//! Common configuration primitives.

mod vars;

pub use vars::{InterpolationResult, interpolate, interpolate_with};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Metrics export configuration.
///
/// There is no metrics listener; a run writes one Prometheus text-format
/// snapshot when it finishes, suitable for the node_exporter textfile collector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// File the snapshot is written to. Metrics are not exported when unset.
    #[serde(default)]
    pub textfile_path: Option<PathBuf>,
}

impl MetricsConfig {
    pub fn enabled(&self) -> bool {
        self.textfile_path.is_some()
    }
}
