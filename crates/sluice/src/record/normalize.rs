//! Turns export lines into change envelopes routed to a destination table.

use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use snafu::prelude::*;
use tracing::debug;

use super::attribute::Item;
use super::tables::classify;
use crate::error::{CleanSnafu, MalformedLineSnafu, NormalizeError};
use crate::schema::{ColumnSchema, FieldType, Preprocessor};

/// Name of the column holding the cleaned record.
pub const NEW_IMAGE: &str = "NewImage";

/// One line of the export.
#[derive(Debug, Deserialize)]
struct ExportLine {
    #[serde(rename = "Item")]
    item: Item,
}

/// Kind of change an envelope describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Insert,
    Modify,
    Remove,
}

/// Primary key of the source item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Keys {
    pub pk: String,
    pub sk: String,
}

/// Change metadata. A migrated item is always a fresh, unprocessed insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub deleted: bool,
    pub event_kind: EventKind,
    pub processed: u64,
    #[serde(serialize_with = "millis_rfc3339")]
    pub timestamp: DateTime<Utc>,
}

/// A row written to a destination table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEnvelope {
    #[serde(rename = "Keys")]
    pub keys: Keys,
    #[serde(rename = "Metadata")]
    pub metadata: Metadata,
    #[serde(rename = "NewImage")]
    pub new_image: Value,
}

fn millis_rfc3339<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Load schema for envelopes whose cleaned image is described by `new_image`.
pub fn envelope_schema(new_image: ColumnSchema) -> Vec<ColumnSchema> {
    vec![
        ColumnSchema::record(
            "Keys",
            vec![
                ColumnSchema::scalar("pk", FieldType::String),
                ColumnSchema::scalar("sk", FieldType::String),
            ],
        ),
        ColumnSchema::record(
            "Metadata",
            vec![
                ColumnSchema::scalar("deleted", FieldType::Boolean),
                ColumnSchema::scalar("eventKind", FieldType::String),
                ColumnSchema::scalar("processed", FieldType::Numeric),
                ColumnSchema::scalar("timestamp", FieldType::Timestamp),
            ],
        ),
        ColumnSchema {
            name: NEW_IMAGE.to_string(),
            ..new_image
        },
    ]
}

/// A record ready for its table sink.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub table: String,
    pub envelope: ChangeEnvelope,
    /// Load schema covering this row.
    pub schema: Vec<ColumnSchema>,
}

/// Why a well-formed record produced no row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OmitReason {
    /// No table is defined for the record's key.
    Unclassified,
    /// The table is filtered out by the run configuration.
    Excluded,
    /// Nothing was left after cleaning.
    Empty,
}

impl OmitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OmitReason::Unclassified => "unclassified",
            OmitReason::Excluded => "excluded",
            OmitReason::Empty => "empty",
        }
    }
}

/// Result of normalizing one record.
#[derive(Debug, Clone)]
pub enum Outcome {
    Row(Box<Normalized>),
    Omitted(OmitReason),
}

/// Routing and cleaning options.
#[derive(Debug, Clone, Default)]
pub struct NormalizerOptions {
    /// When non-empty, only these tables are loaded.
    pub include_tables: Vec<String>,
    pub exclude_tables: Vec<String>,
    /// Used instead of the shard's last-modified time when set.
    pub timestamp_override: Option<DateTime<Utc>>,
}

/// Classifies, cleans and wraps export records.
#[derive(Debug, Clone)]
pub struct Normalizer {
    preprocessor: Preprocessor,
    include: HashSet<String>,
    exclude: HashSet<String>,
    timestamp_override: Option<DateTime<Utc>>,
}

impl Normalizer {
    pub fn new(preprocessor: Preprocessor, options: NormalizerOptions) -> Self {
        Self {
            preprocessor,
            include: options.include_tables.into_iter().collect(),
            exclude: options.exclude_tables.into_iter().collect(),
            timestamp_override: options.timestamp_override,
        }
    }

    /// Normalize one export line of the form `{"Item": {...}}`.
    pub fn normalize_line(
        &self,
        line: &str,
        last_modified: DateTime<Utc>,
    ) -> Result<Outcome, NormalizeError> {
        let ExportLine { item } = serde_json::from_str(line).context(MalformedLineSnafu)?;
        self.normalize(&item, last_modified)
    }

    /// Normalize a decoded item.
    pub fn normalize(
        &self,
        item: &Item,
        last_modified: DateTime<Utc>,
    ) -> Result<Outcome, NormalizeError> {
        let pk = key_attribute(item, "pk")?;
        let sk = key_attribute(item, "sk")?;

        let Some(table) = classify(pk, sk) else {
            debug!(pk, sk, "Omitting unclassified record");
            return Ok(Outcome::Omitted(OmitReason::Unclassified));
        };

        if self.exclude.contains(&table) || (!self.include.is_empty() && !self.include.contains(&table))
        {
            return Ok(Outcome::Omitted(OmitReason::Excluded));
        }

        let cleaned = self
            .preprocessor
            .preprocess_item(NEW_IMAGE, item)
            .context(CleanSnafu { pk, sk })?;
        let Some(cleaned) = cleaned else {
            return Ok(Outcome::Omitted(OmitReason::Empty));
        };

        let envelope = ChangeEnvelope {
            keys: Keys {
                pk: pk.to_string(),
                sk: sk.to_string(),
            },
            metadata: Metadata {
                deleted: false,
                event_kind: EventKind::Insert,
                processed: 0,
                timestamp: self.timestamp_override.unwrap_or(last_modified),
            },
            new_image: cleaned.value,
        };

        Ok(Outcome::Row(Box::new(Normalized {
            table,
            envelope,
            schema: envelope_schema(cleaned.schema),
        })))
    }
}

fn key_attribute<'a>(item: &'a Item, attribute: &'static str) -> Result<&'a str, NormalizeError> {
    item.get(attribute)
        .and_then(|v| v.as_str())
        .ok_or(NormalizeError::MissingKey { attribute })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn normalizer(options: NormalizerOptions) -> Normalizer {
        Normalizer::new(Preprocessor::default(), options)
    }

    fn modified() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 5, 10, 18, 33, 27).unwrap()
    }

    fn line(pk: &str, sk: &str, extra: Value) -> String {
        let mut item = json!({"pk": {"S": pk}, "sk": {"S": sk}});
        if let (Some(obj), Value::Object(extra)) = (item.as_object_mut(), extra) {
            obj.extend(extra);
        }
        json!({ "Item": item }).to_string()
    }

    fn row(outcome: Outcome) -> Normalized {
        match outcome {
            Outcome::Row(row) => *row,
            Outcome::Omitted(reason) => panic!("record omitted: {reason:?}"),
        }
    }

    #[test]
    fn test_envelope_wraps_cleaned_image() {
        let out = normalizer(NormalizerOptions::default())
            .normalize_line(
                &line("userProfile#1", "patient#1", json!({"name": {"S": "Ada"}, "gone": {"NULL": true}})),
                modified(),
            )
            .unwrap();
        let row = row(out);

        assert_eq!(row.table, "patients");
        assert_eq!(
            serde_json::to_value(&row.envelope).unwrap(),
            json!({
                "Keys": {"pk": "userProfile#1", "sk": "patient#1"},
                "Metadata": {
                    "deleted": false,
                    "eventKind": "INSERT",
                    "processed": 0,
                    "timestamp": "2022-05-10T18:33:27.000Z"
                },
                "NewImage": {"pk": "userProfile#1", "sk": "patient#1", "name": "Ada"}
            })
        );

        let names: Vec<_> = row.schema.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Keys", "Metadata", "NewImage"]);
        assert_eq!(row.schema[2].fields.len(), 3);
    }

    #[test]
    fn test_timestamp_override() {
        let fixed = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let out = normalizer(NormalizerOptions {
            timestamp_override: Some(fixed),
            ..Default::default()
        })
        .normalize_line(&line("patient#1", "journey#1", json!({})), modified())
        .unwrap();

        assert_eq!(row(out).envelope.metadata.timestamp, fixed);
    }

    #[test]
    fn test_unclassified_and_filtered_records_are_omitted() {
        let options = NormalizerOptions {
            exclude_tables: vec!["rulecollection_state".into()],
            ..Default::default()
        };
        let n = normalizer(options);

        let out = n
            .normalize_line(&line("device#1", "x#1", json!({})), modified())
            .unwrap();
        assert!(matches!(out, Outcome::Omitted(OmitReason::Unclassified)));

        let out = n
            .normalize_line(
                &line("ruleCollection#1", "ruleCollection#1#state", json!({})),
                modified(),
            )
            .unwrap();
        assert!(matches!(out, Outcome::Omitted(OmitReason::Excluded)));
    }

    #[test]
    fn test_include_list_limits_tables() {
        let n = normalizer(NormalizerOptions {
            include_tables: vec!["journeys".into()],
            ..Default::default()
        });

        let out = n
            .normalize_line(&line("patient#1", "appointment#1", json!({})), modified())
            .unwrap();
        assert!(matches!(out, Outcome::Omitted(OmitReason::Excluded)));

        let out = n
            .normalize_line(&line("patient#1", "journey#1", json!({})), modified())
            .unwrap();
        assert!(matches!(out, Outcome::Row(_)));
    }

    #[test]
    fn test_clean_failure_names_the_keys() {
        let err = normalizer(NormalizerOptions::default())
            .normalize_line(
                &line("patient#1", "journey#1", json!({"blob": {"B": "AAEC"}})),
                modified(),
            )
            .unwrap_err();

        assert!(matches!(err, NormalizeError::Clean { ref pk, ref sk, .. } if pk == "patient#1" && sk == "journey#1"));
        assert_eq!(err.reason(), "clean_failed");
    }

    #[test]
    fn test_malformed_lines() {
        let n = normalizer(NormalizerOptions::default());

        let err = n.normalize_line("not json", modified()).unwrap_err();
        assert!(matches!(err, NormalizeError::MalformedLine { .. }));

        let err = n.normalize_line(r#"{"Other": {}}"#, modified()).unwrap_err();
        assert!(matches!(err, NormalizeError::MalformedLine { .. }));

        let err = n
            .normalize_line(r#"{"Item": {"sk": {"S": "journey#1"}}}"#, modified())
            .unwrap_err();
        assert!(matches!(err, NormalizeError::MissingKey { attribute: "pk" }));
    }
}
