//! Schema-inferring value preprocessor.
//!
//! [`Preprocessor::preprocess`] walks a typed attribute and returns the cleaned
//! value together with the column schema describing it, or `None` when the value
//! should produce no column at all (nulls, empty strings, `VOIDED`, and lists or
//! maps that are empty after cleaning).
//!
//! Cleaning rules by attribute type:
//!
//! | Type | Cleaned value | Column type |
//! |------|---------------|-------------|
//! | `NULL` | omitted | - |
//! | `BOOL` | boolean | BOOLEAN |
//! | `N` | number | NUMERIC |
//! | `S` legacy date | RFC 3339 UTC string | TIMESTAMP |
//! | `S` canonical UTC date | trimmed string | TIMESTAMP |
//! | `S` other | string | STRING |
//! | `L`, `SS`, `NS` | array | element type, REPEATED |
//! | `M` | object with sanitized keys | RECORD |
//! | `B`, `BS` | unsupported | - |

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Number, Value};

use super::dates::{LegacyDateParser, is_iso_utc_date};
use super::{ColumnSchema, FieldMode, FieldType, merge_fields};
use crate::error::PreprocessError;
use crate::record::attribute::{AttributeValue, Item};

/// Maximum nesting of lists and maps below the root.
pub const MAX_DEPTH: usize = 64;

/// Strings with this value are treated as absent.
const VOIDED: &str = "VOIDED";

/// Largest integer a double represents exactly.
const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

static INVALID_FIELD_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("valid field name regex"));

/// Replace every character outside `[A-Za-z0-9_]` with `_`.
pub fn sanitize_field_name(name: &str) -> Cow<'_, str> {
    INVALID_FIELD_CHARS.replace_all(name, "_")
}

/// Options controlling value cleaning.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreprocessorOptions {
    /// Keep `""` as a STRING value instead of omitting it.
    pub keep_empty_strings: bool,
}

/// A cleaned value and the schema that describes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessed {
    pub value: Value,
    pub schema: ColumnSchema,
}

impl Preprocessed {
    fn scalar(name: &str, field_type: FieldType, value: Value) -> Self {
        Self {
            value,
            schema: ColumnSchema::scalar(name, field_type),
        }
    }
}

type Outcome = Result<Option<Preprocessed>, PreprocessError>;

/// Derives cleaned values and column schemas from typed attributes.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    options: PreprocessorOptions,
    dates: LegacyDateParser,
}

impl Preprocessor {
    pub fn new(options: PreprocessorOptions, dates: LegacyDateParser) -> Self {
        Self { options, dates }
    }

    /// Preprocess a single value under the given field name.
    pub fn preprocess(&self, field: &str, value: &AttributeValue) -> Outcome {
        self.visit(field, value, 0)
    }

    /// Preprocess a whole item as a RECORD named `field`.
    pub fn preprocess_item(&self, field: &str, item: &Item) -> Outcome {
        self.visit_map(field, item, 0)
    }

    fn visit(&self, field: &str, value: &AttributeValue, depth: usize) -> Outcome {
        match value {
            AttributeValue::Binary(_) | AttributeValue::BinarySet(_) => {
                Err(PreprocessError::UnsupportedType {
                    field: field.to_string(),
                    tag: value.tag(),
                })
            }
            AttributeValue::Null(_) => Ok(None),
            AttributeValue::Bool(b) => Ok(Some(Preprocessed::scalar(
                field,
                FieldType::Boolean,
                Value::Bool(*b),
            ))),
            AttributeValue::Number(text) => self.visit_number(field, text).map(Some),
            AttributeValue::String(s) => Ok(self.visit_string(field, s)),
            AttributeValue::List(values) => {
                let depth = self.descend(field, depth)?;
                self.visit_list(field, values.iter().map(|v| self.visit(field, v, depth)))
            }
            AttributeValue::StringSet(values) => {
                self.descend(field, depth)?;
                self.visit_list(field, values.iter().map(|s| Ok(self.visit_string(field, s))))
            }
            AttributeValue::NumberSet(values) => {
                self.descend(field, depth)?;
                self.visit_list(
                    field,
                    values.iter().map(|n| self.visit_number(field, n).map(Some)),
                )
            }
            AttributeValue::Map(map) => {
                let depth = self.descend(field, depth)?;
                self.visit_map(field, map, depth)
            }
        }
    }

    fn descend(&self, field: &str, depth: usize) -> Result<usize, PreprocessError> {
        if depth >= MAX_DEPTH {
            return Err(PreprocessError::NestingTooDeep {
                field: field.to_string(),
                limit: MAX_DEPTH,
            });
        }
        Ok(depth + 1)
    }

    fn visit_number(&self, field: &str, text: &str) -> Result<Preprocessed, PreprocessError> {
        let unsupported = |tag| PreprocessError::UnsupportedType {
            field: field.to_string(),
            tag,
        };
        let text = text.trim();

        let number = if let Ok(int) = text.parse::<i64>() {
            if int.unsigned_abs() > MAX_SAFE_INTEGER {
                return Err(unsupported("unbounded integer"));
            }
            Number::from(int)
        } else if is_integer_literal(text) {
            return Err(unsupported("unbounded integer"));
        } else {
            text.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .ok_or_else(|| unsupported("non-numeric N"))?
        };

        Ok(Preprocessed::scalar(field, FieldType::Numeric, Value::Number(number)))
    }

    fn visit_string(&self, field: &str, s: &str) -> Option<Preprocessed> {
        if s.is_empty() {
            return self
                .options
                .keep_empty_strings
                .then(|| Preprocessed::scalar(field, FieldType::String, Value::from(s)));
        }
        if s == VOIDED {
            return None;
        }
        if let Some(timestamp) = self.dates.parse(s) {
            return Some(Preprocessed::scalar(
                field,
                FieldType::Timestamp,
                Value::String(timestamp),
            ));
        }

        let trimmed = s.trim();
        if is_iso_utc_date(trimmed) {
            return Some(Preprocessed::scalar(
                field,
                FieldType::Timestamp,
                Value::from(trimmed),
            ));
        }

        Some(Preprocessed::scalar(field, FieldType::String, Value::from(s)))
    }

    fn visit_list(
        &self,
        field: &str,
        elements: impl Iterator<Item = Outcome>,
    ) -> Outcome {
        let mut values = Vec::new();
        let mut schemas = Vec::new();
        for element in elements {
            let Some(Preprocessed { value, schema }) = element? else {
                continue;
            };
            // A nested list contributes its elements, so the column stays one level deep.
            match value {
                Value::Array(inner) if schema.mode == FieldMode::Repeated => values.extend(inner),
                value => values.push(value),
            }
            schemas.push(schema);
        }

        let Some(first) = schemas.first() else {
            return Ok(None);
        };
        let field_type = first.field_type;
        if let Some(other) = schemas.iter().find(|s| s.field_type != field_type) {
            return Err(PreprocessError::MixedTypeArray {
                field: field.to_string(),
                first: field_type.as_str(),
                second: other.field_type.as_str(),
            });
        }

        let mut fields = Vec::new();
        if field_type == FieldType::Record {
            for schema in &schemas {
                merge_fields(&mut fields, &schema.fields)?;
            }
        }

        let schema = if field_type == FieldType::Record {
            ColumnSchema::record(field, fields)
        } else {
            ColumnSchema::scalar(field, field_type)
        };
        Ok(Some(Preprocessed {
            value: Value::Array(values),
            schema: schema.with_mode(FieldMode::Repeated),
        }))
    }

    fn visit_map(&self, field: &str, map: &Item, depth: usize) -> Outcome {
        let mut object = Map::new();
        let mut fields = Vec::new();

        for (key, value) in map {
            let name = sanitize_field_name(key);
            let Some(child) = self.visit(&name, value, depth)? else {
                continue;
            };
            // After sanitizing, distinct keys may collide; the first one wins.
            if object.contains_key(name.as_ref()) {
                continue;
            }
            object.insert(name.into_owned(), child.value);
            fields.push(child.schema);
        }

        if object.is_empty() {
            return Ok(None);
        }

        Ok(Some(Preprocessed {
            value: Value::Object(object),
            schema: ColumnSchema::record(field, fields),
        }))
    }
}

fn is_integer_literal(text: &str) -> bool {
    let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}
