//! Column schemas and the value preprocessor that infers them.
//!
//! - `preprocess`: derives a cleaned value and a [`ColumnSchema`] from a typed attribute
//! - `dates`: legacy date strings and canonical UTC timestamps
//!
//! Schemas serialize in the warehouse's JSON schema shape:
//! `{"name": "...", "type": "RECORD", "mode": "REPEATED", "fields": [...]}`.

pub mod dates;
pub mod preprocess;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PreprocessError;

pub use dates::{LegacyDateParser, is_iso_utc_date};
pub use preprocess::{Preprocessed, Preprocessor, PreprocessorOptions, sanitize_field_name};

/// Column type of a warehouse field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    Numeric,
    Boolean,
    String,
    Timestamp,
    Record,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Numeric => "NUMERIC",
            FieldType::Boolean => "BOOLEAN",
            FieldType::String => "STRING",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::Record => "RECORD",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column mode of a warehouse field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    #[default]
    Nullable,
    Repeated,
    Required,
}

impl FieldMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldMode::Nullable => "NULLABLE",
            FieldMode::Repeated => "REPEATED",
            FieldMode::Required => "REQUIRED",
        }
    }
}

/// A single column definition.
///
/// `fields` is non-empty exactly when `field_type` is [`FieldType::Record`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub mode: FieldMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<ColumnSchema>,
}

impl ColumnSchema {
    /// A nullable scalar column.
    pub fn scalar(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            mode: FieldMode::Nullable,
            fields: Vec::new(),
        }
    }

    /// A nullable record column with the given children.
    pub fn record(name: impl Into<String>, fields: Vec<ColumnSchema>) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Record,
            mode: FieldMode::Nullable,
            fields,
        }
    }

    /// Same column with a different mode.
    pub fn with_mode(mut self, mode: FieldMode) -> Self {
        self.mode = mode;
        self
    }

    fn describe(&self) -> String {
        format!("{} {}", self.mode.as_str(), self.field_type)
    }
}

/// Merge `incoming` into `existing` as a de-duplicated union.
///
/// Existing fields keep their position, unseen fields are appended in the order
/// they first appear, and record fields with the same name are merged
/// recursively. A name reused with a different type or mode is rejected and
/// `existing` is left untouched.
///
/// Returns `true` when `existing` grew.
pub fn merge_fields(
    existing: &mut Vec<ColumnSchema>,
    incoming: &[ColumnSchema],
) -> Result<bool, PreprocessError> {
    ensure_compatible(existing, incoming)?;
    Ok(extend_fields(existing, incoming))
}

fn ensure_compatible(
    existing: &[ColumnSchema],
    incoming: &[ColumnSchema],
) -> Result<(), PreprocessError> {
    // Fields appended earlier in `incoming` also constrain later ones.
    let mut added: Vec<&ColumnSchema> = Vec::new();

    for field in incoming {
        let current = existing
            .iter()
            .find(|f| f.name == field.name)
            .or_else(|| added.iter().copied().find(|f| f.name == field.name));

        match current {
            Some(current) => {
                if current.field_type != field.field_type || current.mode != field.mode {
                    return Err(PreprocessError::ConflictingFieldTypes {
                        field: field.name.clone(),
                        existing: current.describe(),
                        incoming: field.describe(),
                    });
                }
                if field.field_type == FieldType::Record {
                    ensure_compatible(&current.fields, &field.fields)?;
                }
            }
            None => added.push(field),
        }
    }
    Ok(())
}

fn extend_fields(existing: &mut Vec<ColumnSchema>, incoming: &[ColumnSchema]) -> bool {
    let mut grew = false;
    for field in incoming {
        match existing.iter_mut().find(|f| f.name == field.name) {
            Some(current) if current.field_type == FieldType::Record => {
                grew |= extend_fields(&mut current.fields, &field.fields);
            }
            Some(_) => {}
            None => {
                existing.push(field.clone());
                grew = true;
            }
        }
    }
    grew
}
