//! Typed attribute values as they appear in the table export.
//!
//! Each value is a single-key object naming its type, e.g. `{"S": "abc"}`,
//! `{"N": "42"}` or `{"M": {"inner": {"BOOL": true}}}`.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// An item: attribute name to typed value, in export order.
pub type Item = IndexMap<String, AttributeValue>;

/// A typed attribute value. Exactly one tag is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// Base64 encoded binary.
    #[serde(rename = "B")]
    Binary(String),
    #[serde(rename = "BS")]
    BinarySet(Vec<String>),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "L")]
    List(Vec<AttributeValue>),
    #[serde(rename = "M")]
    Map(Item),
    /// Decimal text, kept verbatim until preprocessing.
    #[serde(rename = "N", deserialize_with = "number_text")]
    Number(String),
    #[serde(rename = "NS", deserialize_with = "number_texts")]
    NumberSet(Vec<String>),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "S")]
    String(String),
    #[serde(rename = "SS")]
    StringSet(Vec<String>),
}

impl AttributeValue {
    /// The export tag naming this value's type.
    pub fn tag(&self) -> &'static str {
        match self {
            AttributeValue::Binary(_) => "B",
            AttributeValue::BinarySet(_) => "BS",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::List(_) => "L",
            AttributeValue::Map(_) => "M",
            AttributeValue::Number(_) => "N",
            AttributeValue::NumberSet(_) => "NS",
            AttributeValue::Null(_) => "NULL",
            AttributeValue::String(_) => "S",
            AttributeValue::StringSet(_) => "SS",
        }
    }

    /// The string payload, if this is an `S` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for AttributeValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => AttributeValue::Null(true),
            Value::Bool(b) => AttributeValue::Bool(b),
            Value::Number(n) => AttributeValue::Number(n.to_string()),
            Value::String(s) => AttributeValue::String(s),
            Value::Array(values) => {
                AttributeValue::List(values.into_iter().map(AttributeValue::from).collect())
            }
            Value::Object(map) => AttributeValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, AttributeValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Numbers are usually exported as strings but plain JSON numbers are accepted.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberRepr {
    Text(String),
    Json(serde_json::Number),
}

impl From<NumberRepr> for String {
    fn from(repr: NumberRepr) -> Self {
        match repr {
            NumberRepr::Text(s) => s,
            NumberRepr::Json(n) => n.to_string(),
        }
    }
}

fn number_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    NumberRepr::deserialize(deserializer).map(String::from)
}

fn number_texts<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Vec::<NumberRepr>::deserialize(deserializer)
        .map(|values| values.into_iter().map(String::from).collect())
}
