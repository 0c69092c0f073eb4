//! Keyed document storage
//!
//! The memory core never talks to a concrete database. It depends on
//! [`DocumentStore`], a small set of document operations addressed by
//! `(collection, key)`. Array operations on a single document are atomic:
//! a multi-value push is observed entirely or not at all, and a prefix trim
//! removes exactly the requested items.

use crate::error::{JarvisError, JarvisResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Collection holding one conversation log per participant
pub const CONVERSATIONS: &str = "member_chat";

/// Collection holding summary digests per participant
pub const SUMMARIES: &str = "member_chat_summary";

/// Collection holding behavioral insights per participant
pub const INSIGHTS: &str = "member_insights";

/// Collection holding participant goals
pub const GOALS: &str = "active_goals";

/// Collection holding issued instructions
pub const INSTRUCTIONS: &str = "instructions";

/// Collection holding participant profiles
pub const MEMBERS: &str = "members";

/// Collection holding team records
pub const TEAMS: &str = "teams";

/// Collection holding generated project plans
pub const PLANS: &str = "plan_history";

/// Portion of an array field to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArraySlice {
    /// First `n` items
    Head(usize),
    /// Last `n` items
    Tail(usize),
    /// Every item
    All,
}

/// Generic keyed document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a whole document
    async fn read(&self, collection: &str, key: &str) -> JarvisResult<Option<Value>>;

    /// Replace a whole document
    async fn write(&self, collection: &str, key: &str, document: Value) -> JarvisResult<()>;

    /// Delete a document, returning whether it existed
    async fn delete(&self, collection: &str, key: &str) -> JarvisResult<bool>;

    /// List every `(key, document)` pair of a collection
    async fn list(&self, collection: &str) -> JarvisResult<Vec<(String, Value)>>;

    /// Set one top-level field, creating the document if needed
    async fn set_field(
        &self,
        collection: &str,
        key: &str,
        field: &str,
        value: Value,
    ) -> JarvisResult<()>;

    /// Push `values` onto an array field in one step, creating the document
    /// and the array if needed. Returns the new array length.
    async fn append_to_array(
        &self,
        collection: &str,
        key: &str,
        field: &str,
        values: Vec<Value>,
    ) -> JarvisResult<usize>;

    /// Length of an array field (0 when the document or field is missing)
    async fn array_len(&self, collection: &str, key: &str, field: &str) -> JarvisResult<usize>;

    /// Read part of an array field without modifying it
    async fn array_slice(
        &self,
        collection: &str,
        key: &str,
        field: &str,
        slice: ArraySlice,
    ) -> JarvisResult<Vec<Value>>;

    /// Remove and return the first `count` items of an array field in one step.
    ///
    /// Fails with [`JarvisError::OutOfRange`] and leaves the array untouched
    /// when `count` exceeds its length.
    async fn trim_array_prefix(
        &self,
        collection: &str,
        key: &str,
        field: &str,
        count: usize,
    ) -> JarvisResult<Vec<Value>>;
}

type Collection = HashMap<String, Value>;

/// In-process [`DocumentStore`]
///
/// Each operation holds the table lock for its whole duration, which makes
/// every single-document operation atomic.
#[derive(Default)]
pub struct InMemoryStorage {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection
    pub fn document_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, HashMap::len)
    }
}

fn new_document(key: &str) -> Value {
    let mut doc = Map::new();
    doc.insert("_id".to_string(), Value::String(key.to_string()));
    Value::Object(doc)
}

fn object_mut<'a>(doc: &'a mut Value, key: &str) -> JarvisResult<&'a mut Map<String, Value>> {
    doc.as_object_mut().ok_or_else(|| {
        JarvisError::storage(
            "object_access",
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("document '{}' is not an object", key),
            ),
        )
    })
}

fn array_of<'a>(doc: &'a Value, field: &str) -> &'a [Value] {
    doc.get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn slice_of(items: &[Value], slice: ArraySlice) -> Vec<Value> {
    match slice {
        ArraySlice::Head(n) => items.iter().take(n).cloned().collect(),
        ArraySlice::Tail(n) => items[items.len().saturating_sub(n)..].to_vec(),
        ArraySlice::All => items.to_vec(),
    }
}

#[async_trait]
impl DocumentStore for InMemoryStorage {
    async fn read(&self, collection: &str, key: &str) -> JarvisResult<Option<Value>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.get(key))
            .cloned())
    }

    async fn write(&self, collection: &str, key: &str, document: Value) -> JarvisResult<()> {
        if !document.is_object() {
            return Err(JarvisError::validation(
                "document",
                "must be a JSON object",
                document.to_string(),
            ));
        }

        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), document);
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> JarvisResult<bool> {
        Ok(self
            .collections
            .write()
            .get_mut(collection)
            .and_then(|c| c.remove(key))
            .is_some())
    }

    async fn list(&self, collection: &str) -> JarvisResult<Vec<(String, Value)>> {
        let guard = self.collections.read();
        let mut entries: Vec<(String, Value)> = guard
            .get(collection)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        // HashMap order is arbitrary; keep listings stable for callers
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    async fn set_field(
        &self,
        collection: &str,
        key: &str,
        field: &str,
        value: Value,
    ) -> JarvisResult<()> {
        let mut guard = self.collections.write();
        let doc = guard
            .entry(collection.to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert_with(|| new_document(key));

        object_mut(doc, key)?.insert(field.to_string(), value);
        Ok(())
    }

    async fn append_to_array(
        &self,
        collection: &str,
        key: &str,
        field: &str,
        values: Vec<Value>,
    ) -> JarvisResult<usize> {
        let mut guard = self.collections.write();
        let doc = guard
            .entry(collection.to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert_with(|| new_document(key));

        let slot = object_mut(doc, key)?
            .entry(field.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));

        match slot {
            Value::Array(items) => {
                items.extend(values);
                Ok(items.len())
            }
            other => Err(JarvisError::storage(
                "append_to_array",
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("field '{}' holds {} instead of an array", field, other),
                ),
            )),
        }
    }

    async fn array_len(&self, collection: &str, key: &str, field: &str) -> JarvisResult<usize> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.get(key))
            .map_or(0, |doc| array_of(doc, field).len()))
    }

    async fn array_slice(
        &self,
        collection: &str,
        key: &str,
        field: &str,
        slice: ArraySlice,
    ) -> JarvisResult<Vec<Value>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.get(key))
            .map(|doc| slice_of(array_of(doc, field), slice))
            .unwrap_or_default())
    }

    async fn trim_array_prefix(
        &self,
        collection: &str,
        key: &str,
        field: &str,
        count: usize,
    ) -> JarvisResult<Vec<Value>> {
        let mut guard = self.collections.write();
        let items = guard
            .get_mut(collection)
            .and_then(|c| c.get_mut(key))
            .and_then(|doc| doc.get_mut(field))
            .and_then(Value::as_array_mut);

        match items {
            Some(items) if count <= items.len() => Ok(items.drain(..count).collect()),
            Some(items) => Err(JarvisError::out_of_range(count, items.len())),
            None if count == 0 => Ok(Vec::new()),
            None => Err(JarvisError::out_of_range(count, 0)),
        }
    }
}
