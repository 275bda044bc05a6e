//! Response schemas
//!
//! A schema turns a raw body into items and an optional total. Fields are
//! addressed with JSON pointers (RFC 6901). A field the schema expects but the
//! body lacks is a mismatch, never an empty page.

use crate::{ItemId, PageKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Items and total extracted from one response
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Extracted {
    /// Records keyed by their identifier, in response order
    pub items: Vec<(ItemId, Value)>,
    /// Total collection size, if the response reports one
    pub total: Option<u64>,
}

/// Schema errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// Body is not valid JSON
    #[error("body is not valid JSON: {0}")]
    InvalidJson(String),

    /// An expected field is absent
    #[error("missing field at {pointer}")]
    MissingField {
        /// JSON pointer that did not resolve
        pointer: String,
    },

    /// A field has the wrong type
    #[error("field at {pointer} is not {expected}")]
    WrongType {
        /// JSON pointer
        pointer: String,
        /// Expected JSON type
        expected: &'static str,
    },

    /// A record has no usable identifier
    #[error("record {index} has no identifier at {pointer}")]
    MissingId {
        /// Position within the page
        index: usize,
        /// Identifier pointer
        pointer: String,
    },
}

/// Interprets response bodies for a target
pub trait ResponseSchema: Send + Sync + fmt::Debug {
    /// Extract items and total from a 2xx body fetched for `key`
    fn extract(&self, body: &[u8], key: PageKey) -> Result<Extracted, SchemaError>;
}

/// Schema configuration as written in the registry file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum SchemaConfig {
    /// A page object holding an array of records
    Page {
        /// Pointer to the records array (`""` for a bare array)
        #[serde(default = "default_items_pointer")]
        items: String,
        /// Pointer to the total element count
        #[serde(default = "default_total_pointer")]
        total: Option<String>,
        /// Pointer to the identifier inside each record
        #[serde(default = "default_id_pointer")]
        id: String,
    },
    /// The whole body is a single record (ID-sweep)
    Single {
        /// Pointer to the identifier; the probed id is used when absent
        #[serde(default)]
        id: Option<String>,
        /// Pointers that must resolve for the record to be accepted
        #[serde(default)]
        require: Vec<String>,
    },
}

fn default_items_pointer() -> String {
    "/content".to_string()
}

fn default_total_pointer() -> Option<String> {
    Some("/totalElements".to_string())
}

fn default_id_pointer() -> String {
    "/id".to_string()
}

impl Default for SchemaConfig {
    fn default() -> Self {
        SchemaConfig::Page {
            items: default_items_pointer(),
            total: default_total_pointer(),
            id: default_id_pointer(),
        }
    }
}

impl SchemaConfig {
    /// Build the schema described by this configuration
    pub fn build(&self) -> Box<dyn ResponseSchema> {
        match self {
            // `total = ""` disables total extraction.
            SchemaConfig::Page { items, total, id } => Box::new(JsonPointerSchema {
                items: items.clone(),
                total: total.clone().filter(|p| !p.is_empty()),
                id: id.clone(),
            }),
            SchemaConfig::Single { id, require } => Box::new(SingleRecordSchema {
                id: id.clone(),
                require: require.clone(),
            }),
        }
    }
}

fn parse_body(body: &[u8]) -> Result<Value, SchemaError> {
    serde_json::from_slice(body).map_err(|e| SchemaError::InvalidJson(e.to_string()))
}

/// Read a count that may be encoded as a number or a numeric string
pub(crate) fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Page schema addressed by JSON pointers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPointerSchema {
    items: String,
    total: Option<String>,
    id: String,
}

impl JsonPointerSchema {
    /// Schema with explicit pointers
    pub fn new(items: impl Into<String>, total: Option<String>, id: impl Into<String>) -> Self {
        Self {
            items: items.into(),
            total,
            id: id.into(),
        }
    }

    /// Spring Data page layout (`content`, `totalElements`, `id`)
    pub fn spring_page() -> Self {
        Self::new(default_items_pointer(), default_total_pointer(), default_id_pointer())
    }
}

impl ResponseSchema for JsonPointerSchema {
    fn extract(&self, body: &[u8], _key: PageKey) -> Result<Extracted, SchemaError> {
        let document = parse_body(body)?;

        let records = document
            .pointer(&self.items)
            .ok_or_else(|| SchemaError::MissingField {
                pointer: self.items.clone(),
            })?
            .as_array()
            .ok_or_else(|| SchemaError::WrongType {
                pointer: self.items.clone(),
                expected: "an array",
            })?;

        let total = match &self.total {
            None => None,
            Some(pointer) => match document.pointer(pointer) {
                None => {
                    return Err(SchemaError::MissingField {
                        pointer: pointer.clone(),
                    })
                }
                Some(Value::Null) => None,
                Some(value) => Some(as_count(value).ok_or_else(|| SchemaError::WrongType {
                    pointer: pointer.clone(),
                    expected: "a non-negative count",
                })?),
            },
        };

        let items = records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                record
                    .pointer(&self.id)
                    .and_then(ItemId::from_json)
                    .map(|id| (id, record.clone()))
                    .ok_or_else(|| SchemaError::MissingId {
                        index,
                        pointer: self.id.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Extracted { items, total })
    }
}

/// Single-record schema for ID-sweep probes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SingleRecordSchema {
    id: Option<String>,
    require: Vec<String>,
}

impl SingleRecordSchema {
    /// Schema reading the identifier from `id`, or from the probe when `None`
    pub fn new(id: Option<String>, require: Vec<String>) -> Self {
        Self { id, require }
    }
}

impl ResponseSchema for SingleRecordSchema {
    fn extract(&self, body: &[u8], key: PageKey) -> Result<Extracted, SchemaError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Extracted::default());
        }

        let document = parse_body(body)?;
        let is_empty = match &document {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            _ => false,
        };
        if is_empty {
            return Ok(Extracted::default());
        }
        if !document.is_object() {
            return Err(SchemaError::WrongType {
                pointer: String::new(),
                expected: "an object",
            });
        }

        for pointer in &self.require {
            match document.pointer(pointer) {
                None | Some(Value::Null) => {
                    return Err(SchemaError::MissingField {
                        pointer: pointer.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        let id = match &self.id {
            Some(pointer) => document
                .pointer(pointer)
                .and_then(ItemId::from_json)
                .ok_or_else(|| SchemaError::MissingId {
                    index: 0,
                    pointer: pointer.clone(),
                })?,
            None => ItemId::from(key.ordinal()),
        };

        Ok(Extracted {
            items: vec![(id, document)],
            total: None,
        })
    }
}
