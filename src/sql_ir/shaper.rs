//! Result shapers.
//!
//! A [`Shaper`] describes how a result row reconstitutes the value the query
//! projects. Leaves point at projection columns through [`ValueSlot`]s; a
//! non-empty `path` navigates into a JSON value held by that column.
//! Collection element shapers address their element as slot 0.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ValueSlot {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shaper {
    Scalar {
        slot: ValueSlot,
    },
    Entity {
        entity_type: String,
        properties: Vec<(String, ValueSlot)>,
        /// Materializes to `null` when every property is null (outer joins)
        nullable: bool,
    },
    Object {
        members: Vec<(String, Shaper)>,
    },
    Collection {
        slot: ValueSlot,
        element: Box<Shaper>,
    },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MaterializeError {
    #[error("Row has {len} values but the shaper reads slot {index}")]
    RowTooShort { index: usize, len: usize },
    #[error("Slot {index} does not hold an array")]
    NotAnArray { index: usize },
}

impl ValueSlot {
    pub fn new(index: usize) -> Self {
        ValueSlot {
            index,
            path: Vec::new(),
        }
    }

    pub fn with_path(index: usize, path: Vec<String>) -> Self {
        ValueSlot { index, path }
    }

    fn read(&self, row: &[JsonValue]) -> Result<JsonValue, MaterializeError> {
        let mut value = row
            .get(self.index)
            .cloned()
            .ok_or(MaterializeError::RowTooShort {
                index: self.index,
                len: row.len(),
            })?;
        for segment in &self.path {
            value = decode_json_text(value);
            value = match value {
                JsonValue::Object(mut map) => map.remove(segment).unwrap_or(JsonValue::Null),
                _ => JsonValue::Null,
            };
        }
        Ok(value)
    }
}

/// Relational JSON columns come back as text
fn decode_json_text(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::String(text) if text.starts_with('{') || text.starts_with('[') => {
            serde_json::from_str(&text).unwrap_or(JsonValue::String(text))
        }
        other => other,
    }
}

impl Shaper {
    /// Number of projection columns the shaper reads
    pub fn arity(&self) -> usize {
        self.max_index().map_or(0, |max| max + 1)
    }

    fn max_index(&self) -> Option<usize> {
        match self {
            Shaper::Scalar { slot } | Shaper::Collection { slot, .. } => Some(slot.index),
            Shaper::Entity { properties, .. } => properties.iter().map(|(_, s)| s.index).max(),
            Shaper::Object { members } => members.iter().filter_map(|(_, s)| s.max_index()).max(),
        }
    }

    pub fn materialize(&self, row: &[JsonValue]) -> Result<JsonValue, MaterializeError> {
        match self {
            Shaper::Scalar { slot } => slot.read(row),
            Shaper::Entity {
                properties,
                nullable,
                ..
            } => {
                let mut object = Map::with_capacity(properties.len());
                for (name, slot) in properties {
                    object.insert(name.clone(), slot.read(row)?);
                }
                if *nullable && object.values().all(JsonValue::is_null) {
                    Ok(JsonValue::Null)
                } else {
                    Ok(JsonValue::Object(object))
                }
            }
            Shaper::Object { members } => {
                let mut object = Map::with_capacity(members.len());
                for (name, shaper) in members {
                    object.insert(name.clone(), shaper.materialize(row)?);
                }
                Ok(JsonValue::Object(object))
            }
            Shaper::Collection { slot, element } => match decode_json_text(slot.read(row)?) {
                JsonValue::Null => Ok(JsonValue::Array(Vec::new())),
                JsonValue::Array(items) => items
                    .into_iter()
                    .map(|item| element.materialize(std::slice::from_ref(&item)))
                    .collect::<Result<Vec<_>, _>>()
                    .map(JsonValue::Array),
                _ => Err(MaterializeError::NotAnArray { index: slot.index }),
            },
        }
    }
}
