//! Ordered stores of identified domain records.
//!
//! A store exclusively owns its records. Other stores refer to them by
//! identifier only, so removing a record never dangles a pointer, but owners
//! are expected to clean up references (see `CharacterSheet::remove_item`).

use crate::codec::{self, CodecError, KeyedMap};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// A record that can live in a [`RecordStore`].
///
/// Usually derived with `#[derive(Record)]`.
pub trait Record: Serialize + DeserializeOwned + Clone {
    /// Key of this store under the character's `attributes`.
    const STORE: &'static str;
    /// Serialized name of the identifier field.
    const ID_FIELD: &'static str;

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
}

/// Errors from store mutations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("Patch must be a JSON object")]
    InvalidPatch,

    #[error("Patch produced an invalid record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Generate a fresh record identifier.
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// An ordered list of records with unique identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordStore<T> {
    records: Vec<T>,
}

impl<T> Default for RecordStore<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<T: Record> RecordStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from records, rejecting duplicate identifiers.
    pub fn from_records(records: Vec<T>) -> Result<Self, StoreError> {
        let mut store = Self::new();
        for record in records {
            store.add(record)?;
        }
        Ok(store)
    }

    /// Append a record, generating an identifier if it has none.
    pub fn add(&mut self, mut record: T) -> Result<String, StoreError> {
        if record.id().is_empty() {
            record.set_id(generate_id());
        }
        let id = record.id().to_string();
        if self.contains(&id) {
            return Err(StoreError::DuplicateIdentifier(id));
        }
        self.records.push(record);
        Ok(id)
    }

    /// Record with the given identifier.
    pub fn get(&self, id: &str) -> Option<&T> {
        self.records.iter().find(|r| r.id() == id)
    }

    /// Whether a record with the identifier exists.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Replace the record with the same identifier.
    pub fn update(&mut self, record: T) -> Result<(), StoreError> {
        let slot = self
            .records
            .iter_mut()
            .find(|r| r.id() == record.id())
            .ok_or_else(|| StoreError::NotFound(record.id().to_string()))?;
        *slot = record;
        Ok(())
    }

    /// Merge partial attributes into a record.
    ///
    /// The identifier cannot be changed by a patch.
    pub fn patch(&mut self, id: &str, changes: Value) -> Result<&T, StoreError> {
        let Value::Object(changes) = changes else {
            return Err(StoreError::InvalidPatch);
        };
        let index = self
            .position(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut merged = match serde_json::to_value(&self.records[index])? {
            Value::Object(object) => object,
            _ => return Err(StoreError::InvalidPatch),
        };
        for (key, value) in changes {
            if key != T::ID_FIELD {
                merged.insert(key, value);
            }
        }

        let mut record: T = serde_json::from_value(Value::Object(merged))?;
        record.set_id(id.to_string());
        self.records[index] = record;
        Ok(&self.records[index])
    }

    /// Remove a record, returning it if it existed.
    pub fn remove(&mut self, id: &str) -> Option<T> {
        let index = self.position(id)?;
        Some(self.records.remove(index))
    }

    /// Keep only records matching the predicate, returning how many were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let before = self.records.len();
        self.records.retain(|r| keep(r));
        before - self.records.len()
    }

    /// Move a record to a new index, clamped to the end of the list.
    pub fn move_to(&mut self, id: &str, index: usize) -> Result<(), StoreError> {
        let from = self
            .position(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let record = self.records.remove(from);
        let to = index.min(self.records.len());
        self.records.insert(to, record);
        Ok(())
    }

    /// Index of the record in display order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.id() == id)
    }

    /// Records in display order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.records.iter()
    }

    /// Identifiers in display order.
    pub fn ids(&self) -> Vec<&str> {
        self.records.iter().map(Record::id).collect()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records as an ordered slice.
    pub fn as_slice(&self) -> &[T] {
        &self.records
    }

    /// Convert to the host's keyed persistence form.
    pub fn dehydrate(&self) -> Result<KeyedMap, CodecError> {
        codec::encode_records(&self.records)
    }

    /// Rebuild from the host's keyed persistence form.
    pub fn hydrate(map: Option<&KeyedMap>) -> Result<Self, CodecError> {
        Ok(Self {
            records: codec::decode_records(map)?,
        })
    }
}

impl<'a, T> IntoIterator for &'a RecordStore<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
