//! Summary archive - the cold tier of conversational memory
//!
//! Every compaction appends one [`SummaryDigest`] for the participant whose
//! turns were evicted. Digests are never rewritten; the archive only grows.

use crate::error::{JarvisError, JarvisResult};
use crate::storage::{ArraySlice, DocumentStore, SUMMARIES};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const DIGESTS_FIELD: &str = "digests";

/// Condensed text standing in for a batch of evicted turns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryDigest {
    /// Unique identifier
    pub id: String,

    /// Owner of the summarized turns
    pub participant_key: String,

    /// Digest text
    pub text: String,

    /// Number of turns the digest replaced
    pub source_turn_count: usize,

    /// When the digest was produced
    pub created_at: DateTime<Utc>,
}

impl SummaryDigest {
    /// Create a digest stamped now
    pub fn new(
        participant_key: impl Into<String>,
        text: impl Into<String>,
        source_turn_count: usize,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            participant_key: participant_key.into(),
            text: text.into(),
            source_turn_count,
            created_at: Utc::now(),
        }
    }
}

/// Append-only digest sequence per participant
#[derive(Clone)]
pub struct SummaryArchive {
    storage: Arc<dyn DocumentStore>,
}

impl SummaryArchive {
    /// Create an archive over a document store
    pub fn new(storage: Arc<dyn DocumentStore>) -> Self {
        Self { storage }
    }

    /// Append a digest. Returns the participant's digest count.
    pub async fn append(&self, digest: &SummaryDigest) -> JarvisResult<usize> {
        let value = serde_json::to_value(digest)
            .map_err(|e| JarvisError::serialization("serialize_digest", e))?;

        self.storage
            .append_to_array(SUMMARIES, &digest.participant_key, DIGESTS_FIELD, vec![value])
            .await
    }

    /// Most recent digest, if any
    pub async fn latest(&self, participant_key: &str) -> JarvisResult<Option<SummaryDigest>> {
        Ok(self
            .read(participant_key, ArraySlice::Tail(1))
            .await?
            .pop())
    }

    /// Up to `limit` digests, newest first
    pub async fn recent(&self, participant_key: &str, limit: usize) -> JarvisResult<Vec<SummaryDigest>> {
        let mut digests = self.read(participant_key, ArraySlice::Tail(limit)).await?;
        digests.reverse();
        Ok(digests)
    }

    /// Every digest, oldest first
    pub async fn all(&self, participant_key: &str) -> JarvisResult<Vec<SummaryDigest>> {
        self.read(participant_key, ArraySlice::All).await
    }

    /// Number of digests stored for a participant
    pub async fn count(&self, participant_key: &str) -> JarvisResult<usize> {
        self.storage
            .array_len(SUMMARIES, participant_key, DIGESTS_FIELD)
            .await
    }

    async fn read(&self, participant_key: &str, slice: ArraySlice) -> JarvisResult<Vec<SummaryDigest>> {
        self.storage
            .array_slice(SUMMARIES, participant_key, DIGESTS_FIELD, slice)
            .await?
            .into_iter()
            .map(value_to_digest)
            .collect()
    }
}

fn value_to_digest(value: Value) -> JarvisResult<SummaryDigest> {
    serde_json::from_value(value).map_err(|e| JarvisError::serialization("deserialize_digest", e))
}
