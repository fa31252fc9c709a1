//! The migration driver.
//!
//! Shards are processed strictly one after another. Every line is normalized
//! and written to the current [`BatchWindow`] before the next line is pulled
//! from the decompressor, so a backpressured sink holds up the whole shard.
//! Every `batch_size` shards the window is closed, which waits for all of its
//! load jobs to settle, and a fresh window is started.

mod stats;

pub use stats::MigrationStats;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use snafu::prelude::*;
use tracing::{info, warn};

use sluice_core::emit;
use sluice_core::metrics::events::{
    RecordsRead, RecordsSkipped, ShardProcessed, ShardStatus, ShardsListed,
};
use sluice_core::{StorageProvider, StorageProviderRef};

use crate::config::{Config, SinkFailurePolicy};
use crate::error::{FetchShardSnafu, ListShardsSnafu, PipelineError, StorageSnafu};
use crate::record::{Normalizer, NormalizerOptions, Outcome};
use crate::schema::{Preprocessor, PreprocessorOptions};
use crate::sink::{BatchWindow, SinkSettings, StagingWarehouse, Warehouse, WriteOutcome};
use crate::source::{LineReader, ShardSource, StorageShardSource};

/// Batching and failure handling for a run.
#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    /// Shards per batch window; `None` closes a single window at the end.
    pub batch_size: Option<NonZeroUsize>,
    pub on_sink_failure: SinkFailurePolicy,
    pub sinks: SinkSettings,
}

/// A configured migration from a shard source into a warehouse.
pub struct Migration {
    source: Arc<dyn ShardSource>,
    warehouse: Arc<dyn Warehouse>,
    normalizer: Normalizer,
    reader: LineReader,
    settings: RunSettings,
}

impl Migration {
    pub fn new(
        source: Arc<dyn ShardSource>,
        warehouse: Arc<dyn Warehouse>,
        normalizer: Normalizer,
        reader: LineReader,
        settings: RunSettings,
    ) -> Self {
        Self {
            source,
            warehouse,
            normalizer,
            reader,
            settings,
        }
    }

    /// Build a migration reading shards from `source.uri` and staging load
    /// jobs under `destination.uri`.
    pub async fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let source_storage =
            create_storage(&config.source.uri, config.source.storage_options.clone()).await?;
        let destination_storage = create_storage(
            &config.destination.uri,
            config.destination.storage_options.clone(),
        )
        .await?;

        let preprocessor = Preprocessor::new(
            PreprocessorOptions {
                keep_empty_strings: config.run.keep_empty_strings,
            },
            config.run.legacy_date_parser()?,
        );
        let normalizer = Normalizer::new(
            preprocessor,
            NormalizerOptions {
                include_tables: config.run.include_tables.clone(),
                exclude_tables: config.run.exclude_tables.clone(),
                timestamp_override: config.run.timestamp_override()?,
            },
        );

        info!(
            source = source_storage.canonical_url(),
            destination = destination_storage.canonical_url(),
            dataset = %config.destination.dataset,
            "Configured migration"
        );

        Ok(Self::new(
            Arc::new(StorageShardSource::new(source_storage)),
            Arc::new(StagingWarehouse::new(
                destination_storage,
                config.destination.dataset.clone(),
                config.destination.file_size_mb,
            )),
            normalizer,
            LineReader::new(config.source.compression, config.source.line_buffer),
            RunSettings {
                batch_size: config.run.batch_size.and_then(NonZeroUsize::new),
                on_sink_failure: config.run.on_sink_failure,
                sinks: SinkSettings {
                    load: config.destination.load,
                    capacity: config.destination.stream_capacity,
                },
            },
        ))
    }

    /// List the shards a run would process.
    pub async fn list_shards(&self) -> Result<Vec<String>, PipelineError> {
        let keys = self.source.list().await.context(ListShardsSnafu)?;
        emit!(ShardsListed {
            count: keys.len() as u64,
        });
        Ok(keys)
    }

    /// Run the migration to completion.
    pub async fn run(&self) -> Result<MigrationStats, PipelineError> {
        let keys = self.list_shards().await?;
        info!(shards = keys.len(), "Retrieved shard keys");

        let mut stats = MigrationStats {
            shards_listed: keys.len(),
            ..Default::default()
        };
        let mut window = self.open_window(0);

        for (position, key) in keys.iter().enumerate() {
            self.process_shard(key, &mut window, &mut stats).await?;

            let done = position + 1;
            let boundary = self
                .settings
                .batch_size
                .is_some_and(|size| done % size.get() == 0 && done < keys.len());
            if boundary {
                let next = window.index() + 1;
                self.close_window(window, &mut stats).await?;
                window = self.open_window(next);
            }
        }
        self.close_window(window, &mut stats).await?;

        stats.log_summary();
        Ok(stats)
    }

    fn open_window(&self, index: usize) -> BatchWindow {
        BatchWindow::new(index, Arc::clone(&self.warehouse), self.settings.sinks)
    }

    async fn process_shard(
        &self,
        key: &str,
        window: &mut BatchWindow,
        stats: &mut MigrationStats,
    ) -> Result<(), PipelineError> {
        let object = self.source.get(key).await.context(FetchShardSnafu { key })?;
        let (Some(body), Some(last_modified)) = (object.body, object.last_modified) else {
            warn!(shard = %key, "Missing body or last-modified time in shard response, skipping");
            stats.shards_skipped += 1;
            emit!(ShardProcessed {
                status: ShardStatus::Skipped,
            });
            return Ok(());
        };

        info!(shard = %key, bytes = body.len(), window = window.index(), "Streaming shard");
        let mut shard = self.reader.spawn(key, body);
        let mut read = 0;

        while let Some(line) = shard.lines.recv().await {
            let line = line?;
            read += 1;

            let reason = match self.normalizer.normalize_line(&line.text, last_modified) {
                Ok(Outcome::Row(row)) => {
                    match window.write(*row).await {
                        WriteOutcome::Accepted => stats.records_written += 1,
                        WriteOutcome::Backpressured => {
                            stats.records_written += 1;
                            stats.writes_backpressured += 1;
                        }
                        WriteOutcome::Rejected => stats.records_rejected += 1,
                        WriteOutcome::Dropped => stats.records_dropped += 1,
                    }
                    continue;
                }
                Ok(Outcome::Omitted(reason)) => reason.as_str(),
                Err(e) => {
                    warn!(shard = %key, line = line.number, error = %e, "Skipping record");
                    e.reason()
                }
            };
            stats.skip(reason);
            emit!(RecordsSkipped { count: 1, reason });
        }
        shard.finish().await?;

        stats.records_read += read;
        stats.shards_processed += 1;
        emit!(RecordsRead { count: read });
        emit!(ShardProcessed {
            status: ShardStatus::Success,
        });
        Ok(())
    }

    async fn close_window(
        &self,
        window: BatchWindow,
        stats: &mut MigrationStats,
    ) -> Result<(), PipelineError> {
        let report = window.close().await;
        stats.record_window(&report);

        let failed = report.failed();
        if failed == 0 {
            return Ok(());
        }
        match self.settings.on_sink_failure {
            SinkFailurePolicy::Abort => Err(PipelineError::LoadJobsFailed {
                window: report.index,
                failed,
            }),
            SinkFailurePolicy::Continue => {
                warn!(window = report.index, failed, "Load jobs failed, continuing with the next window");
                Ok(())
            }
        }
    }
}

async fn create_storage(
    url: &str,
    options: HashMap<String, String>,
) -> Result<StorageProviderRef, PipelineError> {
    let storage = StorageProvider::for_url_with_options(url, options)
        .await
        .context(StorageSnafu)?;
    Ok(Arc::new(storage))
}

/// Run a migration described by `config`.
///
/// With `dry_run` the shards are listed but nothing is loaded.
pub async fn run_migration(config: &Config, dry_run: bool) -> Result<MigrationStats, PipelineError> {
    let migration = Migration::from_config(config).await?;

    if dry_run {
        let keys = migration.list_shards().await?;
        info!(shards = keys.len(), "Dry run, not loading");
        for key in &keys {
            info!(shard = %key, "Would process shard");
        }
        return Ok(MigrationStats {
            shards_listed: keys.len(),
            ..Default::default()
        });
    }

    migration.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use crate::error::{ReaderError, StorageError};
    use crate::sink::LoadOptions;
    use crate::sink::testing::RecordingWarehouse;
    use crate::source::{CompressionFormat, ShardObject};

    struct MemoryShards {
        shards: Vec<(String, ShardObject)>,
        fail_list: bool,
    }

    #[async_trait]
    impl ShardSource for MemoryShards {
        async fn list(&self) -> Result<Vec<String>, StorageError> {
            if self.fail_list {
                return Err(StorageError::ObjectStore {
                    source: object_store::Error::Generic {
                        store: "memory",
                        source: "listing exhausted".into(),
                    },
                });
            }
            Ok(self.shards.iter().map(|(k, _)| k.clone()).collect())
        }

        async fn get(&self, key: &str) -> Result<ShardObject, StorageError> {
            Ok(self
                .shards
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, o)| o.clone())
                .unwrap_or_default())
        }
    }

    fn gzip_lines(lines: &[String]) -> Bytes {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        for line in lines {
            writeln!(encoder, "{line}").unwrap();
        }
        Bytes::from(encoder.finish().unwrap())
    }

    fn item_line(pk: &str, sk: &str) -> String {
        json!({"Item": {"pk": {"S": pk}, "sk": {"S": sk}, "name": {"S": "x"}}}).to_string()
    }

    fn shard(key: &str, lines: &[String]) -> (String, ShardObject) {
        (
            key.to_string(),
            ShardObject {
                body: Some(gzip_lines(lines)),
                last_modified: Some(Utc.with_ymd_and_hms(2022, 5, 10, 18, 0, 0).unwrap()),
            },
        )
    }

    fn migration(
        shards: Vec<(String, ShardObject)>,
        warehouse: &RecordingWarehouse,
        batch_size: Option<usize>,
        capacity: usize,
        on_sink_failure: SinkFailurePolicy,
    ) -> Migration {
        Migration::new(
            Arc::new(MemoryShards {
                shards,
                fail_list: false,
            }),
            Arc::new(warehouse.clone()),
            Normalizer::new(
                Preprocessor::default(),
                NormalizerOptions {
                    exclude_tables: vec!["rulecollection_state".into()],
                    ..Default::default()
                },
            ),
            LineReader::new(CompressionFormat::Gzip, 4),
            RunSettings {
                batch_size: batch_size.and_then(NonZeroUsize::new),
                on_sink_failure,
                sinks: SinkSettings {
                    load: LoadOptions::default(),
                    capacity,
                },
            },
        )
    }

    #[tokio::test]
    async fn test_each_window_drains_before_the_next_shard() {
        let warehouse = RecordingWarehouse::default();
        let shards = vec![
            shard("data/a.json.gz", &[item_line("userProfile#1", "patient#1")]),
            shard("data/b.json.gz", &[item_line("patient#1", "appointment#1")]),
        ];

        let stats = migration(shards, &warehouse, Some(1), 8, SinkFailurePolicy::Continue)
            .run()
            .await
            .unwrap();

        assert_eq!(
            warehouse.log(),
            vec![
                "open patients w0",
                "row patients",
                "done patients",
                "open appointments w1",
                "row appointments",
                "done appointments",
            ]
        );
        assert_eq!(stats.windows_closed, 2);
        assert_eq!(stats.jobs_succeeded, 2);
        assert_eq!(stats.rows_loaded, 2);
    }

    #[tokio::test]
    async fn test_last_window_may_be_partial() {
        let warehouse = RecordingWarehouse::default();
        let shards = (0..3)
            .map(|i| {
                shard(
                    &format!("data/{i}.json.gz"),
                    &[item_line(&format!("userProfile#{i}"), &format!("patient#{i}"))],
                )
            })
            .collect();

        let stats = migration(shards, &warehouse, Some(2), 8, SinkFailurePolicy::Continue)
            .run()
            .await
            .unwrap();

        let opens: Vec<_> = warehouse
            .log()
            .into_iter()
            .filter(|e| e.starts_with("open"))
            .collect();
        assert_eq!(opens, vec!["open patients w0", "open patients w1"]);
        assert_eq!(stats.windows_closed, 2);
        assert_eq!(stats.rows_loaded, 3);
    }

    #[tokio::test]
    async fn test_unbatched_run_uses_one_window() {
        let warehouse = RecordingWarehouse::default();
        let shards = vec![
            shard("data/a.json.gz", &[item_line("userProfile#1", "patient#1")]),
            shard(
                "data/b.json.gz",
                &[
                    item_line("patient#1", "appointment#1"),
                    item_line("userProfile#2", "patient#2"),
                ],
            ),
        ];

        let stats = migration(shards, &warehouse, None, 8, SinkFailurePolicy::Continue)
            .run()
            .await
            .unwrap();

        let opens: Vec<_> = warehouse
            .log()
            .into_iter()
            .filter(|e| e.starts_with("open"))
            .collect();
        assert_eq!(opens, vec!["open patients w0", "open appointments w0"]);
        assert_eq!(stats.windows_closed, 1);
        assert_eq!(warehouse.rows("patients").len(), 2);
    }

    #[tokio::test]
    async fn test_skips_are_counted_and_do_not_stop_the_run() {
        let warehouse = RecordingWarehouse::default();
        let lines = vec![
            item_line("userProfile#1", "patient#1"),
            "not json".to_string(),
            item_line("device#1", "device#1"),
            item_line("ruleCollection#1", "ruleCollection#1#state"),
            json!({"Item": {"pk": {"S": "userProfile#2"}, "sk": {"S": "patient#2"}, "blob": {"B": "AA=="}}})
                .to_string(),
            json!({"Item": {"pk": {"S": "userProfile#3"}, "sk": {"S": "patient#3"}, "xs": {"L": [{"N": "1"}, {"S": "a"}]}}})
                .to_string(),
        ];
        let shards = vec![
            shard("data/a.json.gz", &lines),
            (
                "data/empty.json.gz".to_string(),
                ShardObject {
                    body: None,
                    last_modified: Some(Utc::now()),
                },
            ),
            (
                "data/undated.json.gz".to_string(),
                ShardObject {
                    body: Some(gzip_lines(&[item_line("userProfile#9", "patient#9")])),
                    last_modified: None,
                },
            ),
        ];

        let stats = migration(shards, &warehouse, Some(1), 8, SinkFailurePolicy::Continue)
            .run()
            .await
            .unwrap();

        assert_eq!(stats.shards_listed, 3);
        assert_eq!(stats.shards_processed, 1);
        assert_eq!(stats.shards_skipped, 2);
        assert_eq!(stats.records_read, 6);
        assert_eq!(stats.records_written, 1);
        assert_eq!(stats.records_skipped["malformed_line"], 1);
        assert_eq!(stats.records_skipped["unclassified"], 1);
        assert_eq!(stats.records_skipped["excluded"], 1);
        assert_eq!(stats.records_skipped["clean_failed"], 2);
        assert_eq!(warehouse.rows("patients").len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_keeps_the_shard_going() {
        let warehouse = RecordingWarehouse::default();
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        writeln!(encoder, "{}", item_line("userProfile#1", "patient#1")).unwrap();
        encoder
            .write_all(b"{\"Item\": {\"pk\": {\"S\": \"userProfile#2\"}, \"sk\": {\"S\": \"patient#2\"}, \"name\": {\"S\": \"caf\xE9\"}}}\n")
            .unwrap();
        encoder.write_all(b"{\"Item\": \xE9\n").unwrap();
        writeln!(encoder, "{}", item_line("userProfile#3", "patient#3")).unwrap();
        let shards = vec![(
            "data/a.json.gz".to_string(),
            ShardObject {
                body: Some(Bytes::from(encoder.finish().unwrap())),
                last_modified: Some(Utc::now()),
            },
        )];

        let stats = migration(shards, &warehouse, None, 8, SinkFailurePolicy::Continue)
            .run()
            .await
            .unwrap();

        assert_eq!(stats.records_read, 4);
        assert_eq!(stats.records_written, 3);
        assert_eq!(stats.records_skipped["malformed_line"], 1);
        let rows = warehouse.rows("patients");
        let pks: Vec<_> = rows.iter().map(|r| r["Keys"]["pk"].as_str().unwrap()).collect();
        assert_eq!(pks, vec!["userProfile#1", "userProfile#2", "userProfile#3"]);
        assert_eq!(rows[1]["NewImage"]["name"], "caf\u{FFFD}");
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let warehouse = RecordingWarehouse::default();
        let migration = Migration::new(
            Arc::new(MemoryShards {
                shards: Vec::new(),
                fail_list: true,
            }),
            Arc::new(warehouse.clone()),
            Normalizer::new(Preprocessor::default(), NormalizerOptions::default()),
            LineReader::new(CompressionFormat::Gzip, 4),
            RunSettings {
                batch_size: None,
                on_sink_failure: SinkFailurePolicy::Continue,
                sinks: SinkSettings {
                    load: LoadOptions::default(),
                    capacity: 8,
                },
            },
        );

        let err = migration.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::ListShards { .. }));
        assert!(warehouse.log().is_empty());
    }

    #[tokio::test]
    async fn test_decompression_failure_is_fatal() {
        let warehouse = RecordingWarehouse::default();
        let shards = vec![(
            "data/corrupt.json.gz".to_string(),
            ShardObject {
                body: Some(Bytes::from_static(b"not gzip at all")),
                last_modified: Some(Utc::now()),
            },
        )];

        let err = migration(shards, &warehouse, None, 8, SinkFailurePolicy::Continue)
            .run()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Reader {
                source: ReaderError::Decompression { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_sink_failure_policy() {
        let shards = || {
            vec![
                shard("data/a.json.gz", &[item_line("userProfile#1", "patient#1")]),
                shard("data/b.json.gz", &[item_line("patient#1", "journey#1")]),
            ]
        };

        let warehouse = RecordingWarehouse::default();
        warehouse.fail_open("patients");
        let stats = migration(shards(), &warehouse, Some(1), 8, SinkFailurePolicy::Continue)
            .run()
            .await
            .unwrap();
        assert_eq!(stats.jobs_failed, 1);
        assert_eq!(stats.jobs_succeeded, 1);
        assert_eq!(stats.records_dropped, 1);

        let warehouse = RecordingWarehouse::default();
        warehouse.fail_open("patients");
        let err = migration(shards(), &warehouse, Some(1), 8, SinkFailurePolicy::Abort)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::LoadJobsFailed { window: 0, failed: 1 }));
        assert!(!warehouse.log().iter().any(|e| e.contains("journeys")));
    }

    #[tokio::test]
    async fn test_backpressure_delays_but_never_drops_rows() {
        let warehouse = RecordingWarehouse::gated();
        let lines: Vec<String> = (0..50)
            .map(|i| item_line(&format!("userProfile#{i}"), &format!("patient#{i}")))
            .collect();
        let shards = vec![shard("data/a.json.gz", &lines)];
        let migration = migration(shards, &warehouse, None, 1, SinkFailurePolicy::Continue);

        let run = tokio::spawn(async move { migration.run().await });

        // Nothing is consumed yet, so the run must be parked on a full stream.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!run.is_finished());
        assert!(warehouse.rows("patients").is_empty());

        warehouse.release(1_000);
        let stats = run.await.unwrap().unwrap();

        assert_eq!(stats.records_written, 50);
        assert!(stats.writes_backpressured > 0);
        assert_eq!(stats.rows_loaded, 50);
        assert_eq!(warehouse.rows("patients").len(), 50);
    }
}
