//! Metrics for a migration run.
//!
//! - `events`: internal event types and the `InternalEvent` trait
//!
//! A migration is a batch job, so metrics are not served over HTTP. The
//! Prometheus recorder is installed once at startup and its rendered state is
//! written to a textfile (for node_exporter's textfile collector) when the run
//! finishes.

pub mod events;

use std::path::Path;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use tracing::info;

use crate::error::{MetricsError, PrometheusInitSnafu, WriteSnapshotSnafu};

/// Histogram buckets for duration metrics, in seconds.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
];

/// Handle to the installed recorder.
#[derive(Clone)]
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl MetricsHandle {
    /// Render all recorded metrics in the Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Write the rendered metrics to `path`, replacing the file atomically.
    pub fn write_snapshot(&self, path: &Path) -> Result<(), MetricsError> {
        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, self.render()).context(WriteSnapshotSnafu { path: &tmp })?;
        std::fs::rename(&tmp, path).context(WriteSnapshotSnafu { path })?;
        info!(path = %path.display(), "Wrote metrics snapshot");
        Ok(())
    }
}

/// Install the global Prometheus recorder.
///
/// Must be called at most once per process.
pub fn init_recorder() -> Result<MetricsHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets(DURATION_BUCKETS)
        .context(PrometheusInitSnafu)?
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    Ok(MetricsHandle { handle })
}

/// Emit a metric event (Vector-style pattern).
///
/// ```ignore
/// use sluice_core::emit;
/// use sluice_core::metrics::events::RecordsRead;
///
/// emit!(RecordsRead { count: 100 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_written_to_textfile() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = MetricsHandle {
            handle: recorder.handle(),
        };

        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("sluice_test_total").increment(3);
        });

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sluice.prom");
        handle.write_snapshot(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("sluice_test_total 3"));
        assert!(!temp_dir.path().join("sluice.prom.tmp").exists());
    }
}
