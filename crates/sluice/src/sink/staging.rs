//! Load jobs staged as NDJSON in object storage.
//!
//! Each job writes its rows, final schema and a manifest under the dataset:
//!
//! ```text
//! {dataset}/
//! └── {table}/
//!     └── {job_id}/
//!         ├── part-00000.ndjson   # rows, rolled at the configured size
//!         ├── part-00001.ndjson
//!         ├── schema.json         # warehouse JSON schema covering every row
//!         └── job.json            # load options and row counts
//! ```
//!
//! `job.json` is written last, so its presence marks a complete job.

use std::sync::LazyLock;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use object_store::path::Path;
use regex::Regex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use sluice_core::{MB, StorageProviderRef};

use super::traits::{LoadChunk, LoadJobStats, LoadOptions, LoadRequest, LoadStream, Warehouse};
use crate::error::SinkError;
use crate::schema::ColumnSchema;

static TABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,1023}$").expect("valid table name regex"));

/// Manifest written at the end of a staged load job.
#[derive(Debug, Serialize)]
struct JobManifest<'a> {
    job_id: &'a str,
    dataset: &'a str,
    table: &'a str,
    window: usize,
    options: LoadOptions,
    output_rows: u64,
    bad_records: u64,
    parts: Vec<String>,
    completed_at: DateTime<Utc>,
}

/// A [`Warehouse`] that stages each load job in object storage.
#[derive(Clone)]
pub struct StagingWarehouse {
    storage: StorageProviderRef,
    dataset: String,
    part_size: usize,
}

impl StagingWarehouse {
    /// Stage jobs under `{dataset}/` and roll row files at `file_size_mb`.
    pub fn new(storage: StorageProviderRef, dataset: impl Into<String>, file_size_mb: usize) -> Self {
        Self {
            storage,
            dataset: dataset.into(),
            part_size: file_size_mb.max(1) * MB,
        }
    }

    #[cfg(test)]
    fn with_part_size(mut self, bytes: usize) -> Self {
        self.part_size = bytes;
        self
    }
}

#[async_trait::async_trait]
impl Warehouse for StagingWarehouse {
    async fn open_load_stream(&self, request: LoadRequest) -> Result<LoadStream, SinkError> {
        if !TABLE_NAME.is_match(&request.table) {
            return Err(SinkError::OpenStream {
                table: request.table,
                reason: "table names may only contain letters, digits and underscores".into(),
            });
        }

        let job_id = format!("w{:05}-{}", request.window, Uuid::new_v4().simple());
        let job = StagedJob {
            storage: self.storage.clone(),
            dataset: self.dataset.clone(),
            table: request.table.clone(),
            job_id: job_id.clone(),
            window: request.window,
            options: request.options,
            schema: request.schema.clone(),
            part_size: self.part_size,
        };

        debug!(table = %request.table, job_id = %job_id, "Opening staged load job");
        Ok(LoadStream::spawn(job_id, &request, move |rx| job.run(rx)))
    }
}

struct StagedJob {
    storage: StorageProviderRef,
    dataset: String,
    table: String,
    job_id: String,
    window: usize,
    options: LoadOptions,
    schema: Vec<ColumnSchema>,
    part_size: usize,
}

impl StagedJob {
    fn job_dir(&self) -> String {
        format!("{}/{}/{}", self.dataset, self.table, self.job_id)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<LoadChunk>) -> Result<LoadJobStats, SinkError> {
        let mut buffer = BytesMut::new();
        let mut parts = Vec::new();
        let mut output_rows = 0;
        let mut bad_records = 0;

        while let Some(chunk) = rx.recv().await {
            match chunk {
                LoadChunk::Row(row) => {
                    buffer.put(row);
                    output_rows += 1;
                    if buffer.len() >= self.part_size {
                        parts.push(self.write_part(parts.len(), buffer.split().freeze()).await?);
                    }
                }
                LoadChunk::Schema(schema) => self.schema = schema,
                LoadChunk::BadRecords(count) => bad_records += count,
            }
        }
        if !buffer.is_empty() {
            parts.push(self.write_part(parts.len(), buffer.freeze()).await?);
        }

        let schema = serde_json::to_vec_pretty(&self.schema)
            .map_err(|source| SinkError::Serialize { source })?;
        self.put("schema.json", Bytes::from(schema)).await?;

        let manifest = JobManifest {
            job_id: &self.job_id,
            dataset: &self.dataset,
            table: &self.table,
            window: self.window,
            options: self.options,
            output_rows,
            bad_records,
            parts,
            completed_at: Utc::now(),
        };
        let manifest =
            serde_json::to_vec_pretty(&manifest).map_err(|source| SinkError::Serialize { source })?;
        self.put("job.json", Bytes::from(manifest)).await?;

        Ok(LoadJobStats {
            job_id: self.job_id,
            output_rows,
            bad_records,
        })
    }

    async fn write_part(&self, index: usize, bytes: Bytes) -> Result<String, SinkError> {
        let name = format!("part-{index:05}.ndjson");
        debug!(table = %self.table, job_id = %self.job_id, part = %name, bytes = bytes.len(), "Writing part");
        self.put(&name, bytes).await?;
        Ok(name)
    }

    async fn put(&self, name: &str, bytes: Bytes) -> Result<(), SinkError> {
        let location = format!("{}/{name}", self.job_dir());
        self.storage
            .put(&Path::from(location.as_str()), bytes)
            .await
            .map_err(|source| SinkError::StagingWrite {
                location: format!("{}/{location}", self.storage.canonical_url()),
                source,
            })
    }
}
