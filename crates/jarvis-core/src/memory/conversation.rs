//! Per-participant conversation log backed by the document store

use crate::error::{JarvisError, JarvisResult};
use crate::storage::{ArraySlice, DocumentStore, CONVERSATIONS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const TURNS_FIELD: &str = "turns";
const UPDATED_AT_FIELD: &str = "updated_at";
const PENDING_FIELD: &str = "compaction_pending";

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The participant
    User,
    /// The assistant
    Assistant,
}

impl Role {
    /// Uppercase label used in prompts
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
        }
    }
}

/// One role-tagged message. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Author of the message
    pub role: Role,

    /// Message text
    pub text: String,

    /// Wall-clock time of the append (advisory; order comes from the log)
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// Create a participant turn
    pub fn user(text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            created_at,
        }
    }

    /// Create an assistant turn
    pub fn assistant(text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            created_at,
        }
    }
}

/// Stored conversation log of one participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityLog {
    /// Participant identity
    #[serde(rename = "_id")]
    pub participant_key: String,

    /// Live turns, oldest first
    #[serde(default)]
    pub turns: Vec<Turn>,

    /// Last append time
    pub updated_at: Option<DateTime<Utc>>,

    /// A qualifying compaction was deferred and is still owed
    #[serde(default)]
    pub compaction_pending: bool,
}

impl EntityLog {
    /// Number of live turns
    pub fn length(&self) -> usize {
        self.turns.len()
    }

    /// Whether the log holds no turns
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Up to the last `k` turns
    pub fn tail(&self, k: usize) -> &[Turn] {
        &self.turns[self.turns.len().saturating_sub(k)..]
    }
}

/// Handle over every participant's [`EntityLog`]
///
/// Writes go through single-document store operations, so an appended pair
/// and a removed prefix are each observed atomically by readers.
#[derive(Clone)]
pub struct EntityLogStore {
    storage: Arc<dyn DocumentStore>,
}

impl EntityLogStore {
    /// Create a log store over a document store
    pub fn new(storage: Arc<dyn DocumentStore>) -> Self {
        Self { storage }
    }

    /// Append turns to the tail in order. Returns the new length.
    ///
    /// Succeeds once the turns are stored; a failure to refresh
    /// `updated_at` afterwards is only logged.
    pub async fn append(&self, participant_key: &str, turns: &[Turn]) -> JarvisResult<usize> {
        let values = turns
            .iter()
            .map(turn_to_value)
            .collect::<JarvisResult<Vec<_>>>()?;

        let length = self
            .storage
            .append_to_array(CONVERSATIONS, participant_key, TURNS_FIELD, values)
            .await?;

        // The pair is committed; a stale timestamp must not report it lost
        if let Err(e) = self
            .storage
            .set_field(
                CONVERSATIONS,
                participant_key,
                UPDATED_AT_FIELD,
                Value::String(Utc::now().to_rfc3339()),
            )
            .await
        {
            tracing::warn!(
                participant = participant_key,
                error = %e,
                "Failed to stamp conversation update time"
            );
        }

        Ok(length)
    }

    /// Current number of live turns (0 for an unknown participant)
    pub async fn length(&self, participant_key: &str) -> JarvisResult<usize> {
        self.storage
            .array_len(CONVERSATIONS, participant_key, TURNS_FIELD)
            .await
    }

    /// Up to the last `k` turns, oldest first
    pub async fn tail(&self, participant_key: &str, k: usize) -> JarvisResult<Vec<Turn>> {
        self.slice(participant_key, ArraySlice::Tail(k)).await
    }

    /// Up to the first `n` turns, without removing them
    pub async fn head(&self, participant_key: &str, n: usize) -> JarvisResult<Vec<Turn>> {
        self.slice(participant_key, ArraySlice::Head(n)).await
    }

    /// Remove and return the first `n` turns in their original order.
    ///
    /// Fails with [`JarvisError::OutOfRange`] when `n` exceeds the length;
    /// the log is left untouched in that case.
    pub async fn remove_prefix(&self, participant_key: &str, n: usize) -> JarvisResult<Vec<Turn>> {
        self.storage
            .trim_array_prefix(CONVERSATIONS, participant_key, TURNS_FIELD, n)
            .await?
            .into_iter()
            .map(value_to_turn)
            .collect()
    }

    /// Full stored log, or `None` before the first turn
    pub async fn load(&self, participant_key: &str) -> JarvisResult<Option<EntityLog>> {
        match self.storage.read(CONVERSATIONS, participant_key).await? {
            Some(doc) => serde_json::from_value(doc)
                .map(Some)
                .map_err(|e| JarvisError::serialization("deserialize_entity_log", e)),
            None => Ok(None),
        }
    }

    /// Whether a deferred compaction is owed
    pub async fn is_compaction_pending(&self, participant_key: &str) -> JarvisResult<bool> {
        Ok(self
            .storage
            .read(CONVERSATIONS, participant_key)
            .await?
            .and_then(|doc| doc.get(PENDING_FIELD).and_then(Value::as_bool))
            .unwrap_or(false))
    }

    /// Record whether a compaction is owed
    pub async fn set_compaction_pending(&self, participant_key: &str, pending: bool) -> JarvisResult<()> {
        self.storage
            .set_field(CONVERSATIONS, participant_key, PENDING_FIELD, Value::Bool(pending))
            .await
    }

    async fn slice(&self, participant_key: &str, slice: ArraySlice) -> JarvisResult<Vec<Turn>> {
        self.storage
            .array_slice(CONVERSATIONS, participant_key, TURNS_FIELD, slice)
            .await?
            .into_iter()
            .map(value_to_turn)
            .collect()
    }
}

fn turn_to_value(turn: &Turn) -> JarvisResult<Value> {
    serde_json::to_value(turn).map_err(|e| JarvisError::serialization("serialize_turn", e))
}

fn value_to_turn(value: Value) -> JarvisResult<Turn> {
    serde_json::from_value(value).map_err(|e| JarvisError::serialization("deserialize_turn", e))
}
