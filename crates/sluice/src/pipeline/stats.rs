//! Run statistics.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::sink::WindowReport;

/// Counters accumulated over a migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationStats {
    pub shards_listed: usize,
    pub shards_processed: usize,
    pub shards_skipped: usize,
    pub records_read: u64,
    pub records_written: u64,
    /// Writes that had to wait for a load job to drain its stream.
    pub writes_backpressured: u64,
    /// Records dropped before reaching a sink, by reason.
    pub records_skipped: BTreeMap<&'static str, u64>,
    /// Records refused by a sink because their schema conflicted.
    pub records_rejected: u64,
    /// Records routed to a sink that had already failed.
    pub records_dropped: u64,
    pub windows_closed: usize,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub rows_loaded: u64,
    pub bad_records: u64,
}

impl MigrationStats {
    pub(crate) fn skip(&mut self, reason: &'static str) {
        *self.records_skipped.entry(reason).or_default() += 1;
    }

    pub fn total_skipped(&self) -> u64 {
        self.records_skipped.values().sum()
    }

    pub(crate) fn record_window(&mut self, report: &WindowReport) {
        self.windows_closed += 1;
        self.jobs_succeeded += report.succeeded();
        self.jobs_failed += report.failed();
        self.rows_loaded += report.rows_loaded();
        self.bad_records += report.bad_records();
    }

    /// Log the final summary.
    pub fn log_summary(&self) {
        info!(
            shards_listed = self.shards_listed,
            shards_processed = self.shards_processed,
            shards_skipped = self.shards_skipped,
            records_read = self.records_read,
            records_written = self.records_written,
            records_skipped = self.total_skipped(),
            records_rejected = self.records_rejected,
            records_dropped = self.records_dropped,
            windows = self.windows_closed,
            jobs_succeeded = self.jobs_succeeded,
            jobs_failed = self.jobs_failed,
            rows_loaded = self.rows_loaded,
            bad_records = self.bad_records,
            "Migration finished"
        );
        for (reason, count) in &self.records_skipped {
            info!(reason, count, "Skipped records");
        }
    }
}
