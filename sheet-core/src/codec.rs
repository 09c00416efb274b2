//! Conversion between ordered lists and the host's keyed persistence maps.
//!
//! The host cannot store ordered lists, so every list is dehydrated into an
//! object keyed by record identifier, with the original index kept in a
//! `position` field, and hydrated back by sorting on that position.

use crate::store::Record;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Identifier field used by untyped records.
pub const ID_FIELD: &str = "_id";

/// Field injected to remember each element's index.
pub const POSITION_FIELD: &str = "position";

/// A dehydrated list: identifier (or index) to attributes.
pub type KeyedMap = Map<String, Value>;

/// Errors from dehydrating or hydrating lists.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Element {index} is not an object")]
    NotAnObject { index: usize },

    #[error("Element {index} has no identifier")]
    MissingIdentifier { index: usize },

    #[error("Duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("Entry '{0}' is not an object")]
    InvalidEntry(String),

    #[error("Entry '{0}' has no valid position")]
    MissingPosition(String),

    #[error("Invalid index key: {0}")]
    InvalidIndex(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Dehydrate a list of `_id`-identified objects.
pub fn to_keyed_map(list: &[Value]) -> Result<KeyedMap, CodecError> {
    to_keyed_map_by(list, ID_FIELD)
}

/// Dehydrate a list whose identifier lives in `id_field`.
///
/// Fails if any element lacks a non-empty string identifier, even when its
/// siblings have one.
pub fn to_keyed_map_by(list: &[Value], id_field: &str) -> Result<KeyedMap, CodecError> {
    let mut map = KeyedMap::new();

    for (index, element) in list.iter().enumerate() {
        let object = element
            .as_object()
            .ok_or(CodecError::NotAnObject { index })?;
        let id = object
            .get(id_field)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or(CodecError::MissingIdentifier { index })?;

        if map.contains_key(id) {
            return Err(CodecError::DuplicateIdentifier(id.to_string()));
        }

        let mut attributes = object.clone();
        attributes.remove(id_field);
        attributes.insert(POSITION_FIELD.to_string(), Value::from(index));
        map.insert(id.to_string(), Value::Object(attributes));
    }

    Ok(map)
}

/// Hydrate a keyed map back into an `_id`-identified list.
pub fn from_keyed_map(map: Option<&KeyedMap>) -> Result<Vec<Value>, CodecError> {
    from_keyed_map_by(map, ID_FIELD)
}

/// Hydrate a keyed map, restoring the identifier into `id_field`.
///
/// A missing map is an empty list. Gaps left by deleted positions are
/// compacted; equal positions fall back to identifier order.
pub fn from_keyed_map_by(map: Option<&KeyedMap>, id_field: &str) -> Result<Vec<Value>, CodecError> {
    let Some(map) = map else {
        return Ok(Vec::new());
    };

    let mut slots = Vec::with_capacity(map.len());
    for (key, entry) in map {
        let object = entry
            .as_object()
            .ok_or_else(|| CodecError::InvalidEntry(key.clone()))?;
        let position = object
            .get(POSITION_FIELD)
            .and_then(position_of)
            .ok_or_else(|| CodecError::MissingPosition(key.clone()))?;

        let mut attributes = object.clone();
        attributes.remove(POSITION_FIELD);
        attributes.insert(id_field.to_string(), Value::String(key.clone()));
        slots.push((position, key, attributes));
    }

    slots.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    Ok(slots
        .into_iter()
        .map(|(_, _, attributes)| Value::Object(attributes))
        .collect())
}

// Positions written by other clients may arrive as whole floats.
fn position_of(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| *f >= 0.0 && f.fract() == 0.0)
            .map(|f| f as u64)
    })
}

/// Dehydrate typed records.
pub fn encode_records<T: Record>(records: &[T]) -> Result<KeyedMap, CodecError> {
    let values = records
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    to_keyed_map_by(&values, T::ID_FIELD)
}

/// Hydrate typed records.
pub fn decode_records<T: Record>(map: Option<&KeyedMap>) -> Result<Vec<T>, CodecError> {
    from_keyed_map_by(map, T::ID_FIELD)?
        .into_iter()
        .map(|value| serde_json::from_value(value).map_err(CodecError::from))
        .collect()
}

/// Dehydrate a list without identifiers, keyed by index.
pub fn to_indexed_map<T: Serialize>(list: &[T]) -> Result<KeyedMap, CodecError> {
    let mut map = KeyedMap::new();
    for (index, element) in list.iter().enumerate() {
        map.insert(index.to_string(), serde_json::to_value(element)?);
    }
    Ok(map)
}

/// Hydrate an index-keyed map, ordering by numeric key.
pub fn from_indexed_map<T: DeserializeOwned>(map: Option<&KeyedMap>) -> Result<Vec<T>, CodecError> {
    let Some(map) = map else {
        return Ok(Vec::new());
    };

    let mut entries = map
        .iter()
        .map(|(key, value)| {
            key.parse::<usize>()
                .map(|index| (index, value))
                .map_err(|_| CodecError::InvalidIndex(key.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|(index, _)| *index);

    entries
        .into_iter()
        .map(|(_, value)| serde_json::from_value(value.clone()).map_err(CodecError::from))
        .collect()
}
