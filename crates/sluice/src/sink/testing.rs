//! In-memory warehouse for sink and pipeline tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use tokio::sync::{Semaphore, mpsc};

use super::traits::{LoadChunk, LoadJobStats, LoadRequest, LoadStream, Warehouse};
use crate::error::SinkError;
use crate::record::attribute::Item;
use crate::record::normalize::{ChangeEnvelope, EventKind, Keys, Metadata, NEW_IMAGE};
use crate::record::{Normalized, envelope_schema};
use crate::schema::{ColumnSchema, Preprocessor};

/// Build a row for `table` from typed attributes, bypassing classification.
pub(crate) fn normalized(table: &str, pk: &str, sk: &str, attributes: Value) -> Normalized {
    let mut item = json!({"pk": {"S": pk}, "sk": {"S": sk}});
    if let (Some(obj), Value::Object(extra)) = (item.as_object_mut(), attributes) {
        obj.extend(extra);
    }
    let item: Item = serde_json::from_value(item).unwrap();
    let cleaned = Preprocessor::default()
        .preprocess_item(NEW_IMAGE, &item)
        .unwrap()
        .unwrap();

    Normalized {
        table: table.to_string(),
        envelope: ChangeEnvelope {
            keys: Keys {
                pk: pk.to_string(),
                sk: sk.to_string(),
            },
            metadata: Metadata {
                deleted: false,
                event_kind: EventKind::Insert,
                processed: 0,
                timestamp: Utc.with_ymd_and_hms(2022, 5, 10, 0, 0, 0).unwrap(),
            },
            new_image: cleaned.value,
        },
        schema: envelope_schema(cleaned.schema),
    }
}

#[derive(Default)]
struct Inner {
    log: Mutex<Vec<String>>,
    rows: Mutex<HashMap<String, Vec<Value>>>,
    schemas: Mutex<HashMap<String, Vec<ColumnSchema>>>,
    fail_open: Mutex<HashSet<String>>,
    fail_after: Mutex<HashMap<String, u64>>,
    gate: Option<Arc<Semaphore>>,
    received: AtomicUsize,
}

/// Warehouse double that records an ordered event log.
///
/// Log entries: `open {table} w{window}`, `row {table}`, `done {table}`,
/// `fail {table}`.
#[derive(Clone, Default)]
pub(crate) struct RecordingWarehouse {
    inner: Arc<Inner>,
}

impl RecordingWarehouse {
    /// Jobs only process a chunk after a permit is released.
    pub fn gated() -> Self {
        Self {
            inner: Arc::new(Inner {
                gate: Some(Arc::new(Semaphore::new(0))),
                ..Default::default()
            }),
        }
    }

    pub fn release(&self, chunks: usize) {
        if let Some(gate) = &self.inner.gate {
            gate.add_permits(chunks);
        }
    }

    /// Wait until jobs have taken `count` chunks off their streams.
    pub async fn wait_for_pending(&self, count: usize) {
        while self.inner.received.load(Ordering::SeqCst) < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    pub fn fail_open(&self, table: &str) {
        self.inner.fail_open.lock().unwrap().insert(table.to_string());
    }

    /// Fail the job for `table` when it receives a row after `rows` rows.
    pub fn fail_job_after(&self, table: &str, rows: u64) {
        self.inner
            .fail_after
            .lock()
            .unwrap()
            .insert(table.to_string(), rows);
    }

    pub fn log(&self) -> Vec<String> {
        self.inner.log.lock().unwrap().clone()
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.inner
            .rows
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn final_schema(&self, table: &str) -> Option<Vec<ColumnSchema>> {
        self.inner.schemas.lock().unwrap().get(table).cloned()
    }

    fn push_log(inner: &Inner, entry: String) {
        inner.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl Warehouse for RecordingWarehouse {
    async fn open_load_stream(&self, request: LoadRequest) -> Result<LoadStream, SinkError> {
        let table = request.table.clone();
        if self.inner.fail_open.lock().unwrap().contains(&table) {
            Self::push_log(&self.inner, format!("fail {table}"));
            return Err(SinkError::OpenStream {
                table,
                reason: "access denied".into(),
            });
        }
        Self::push_log(&self.inner, format!("open {table} w{}", request.window));

        let job_id = format!("job-{table}-{}", request.window);
        let inner = Arc::clone(&self.inner);
        let schema = request.schema.clone();
        let id = job_id.clone();
        Ok(LoadStream::spawn(job_id, &request, move |rx| {
            run_job(inner, table, id, schema, rx)
        }))
    }
}

async fn run_job(
    inner: Arc<Inner>,
    table: String,
    job_id: String,
    mut schema: Vec<ColumnSchema>,
    mut rx: mpsc::Receiver<LoadChunk>,
) -> Result<LoadJobStats, SinkError> {
    let limit = inner.fail_after.lock().unwrap().get(&table).copied();
    let mut output_rows = 0;
    let mut bad_records = 0;

    while let Some(chunk) = rx.recv().await {
        inner.received.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &inner.gate {
            gate.acquire().await.unwrap().forget();
        }

        match chunk {
            LoadChunk::Row(bytes) => {
                if limit.is_some_and(|limit| output_rows >= limit) {
                    RecordingWarehouse::push_log(&inner, format!("fail {table}"));
                    return Err(SinkError::JobFailed {
                        location: Some(format!("{table}/{job_id}")),
                        table,
                        reason: "injected failure".into(),
                    });
                }
                let value: Value = serde_json::from_slice(&bytes).unwrap();
                inner
                    .rows
                    .lock()
                    .unwrap()
                    .entry(table.clone())
                    .or_default()
                    .push(value);
                RecordingWarehouse::push_log(&inner, format!("row {table}"));
                output_rows += 1;
            }
            LoadChunk::Schema(next) => schema = next,
            LoadChunk::BadRecords(count) => bad_records += count,
        }
    }

    inner.schemas.lock().unwrap().insert(table.clone(), schema);
    RecordingWarehouse::push_log(&inner, format!("done {table}"));
    Ok(LoadJobStats {
        job_id,
        output_rows,
        bad_records,
    })
}
