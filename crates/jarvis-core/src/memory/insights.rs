//! Behavioral insights - one-sentence status notes per interaction

use crate::error::{JarvisError, JarvisResult};
use crate::storage::{ArraySlice, DocumentStore, INSIGHTS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const INSIGHTS_FIELD: &str = "insights";

/// Insights kept per participant unless configured otherwise
pub const DEFAULT_INSIGHT_RETENTION: usize = 50;

/// What a participant appeared to be doing at one point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    /// Insight sentence
    pub text: String,

    /// Capture time
    pub created_at: DateTime<Utc>,
}

/// Insight sequence per participant, capped at the newest `retention`
#[derive(Clone)]
pub struct InsightLog {
    storage: Arc<dyn DocumentStore>,
    retention: usize,
}

impl InsightLog {
    /// Create an insight log over a document store
    pub fn new(storage: Arc<dyn DocumentStore>) -> Self {
        Self {
            storage,
            retention: DEFAULT_INSIGHT_RETENTION,
        }
    }

    /// Keep at most `retention` insights per participant (minimum 1)
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    /// Record an insight, dropping the oldest ones beyond the retention.
    /// Blank text is ignored.
    pub async fn record(&self, participant_key: &str, text: &str) -> JarvisResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let insight = Insight {
            text: text.to_string(),
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&insight)
            .map_err(|e| JarvisError::serialization("serialize_insight", e))?;

        let length = self
            .storage
            .append_to_array(INSIGHTS, participant_key, INSIGHTS_FIELD, vec![value])
            .await?;

        if length > self.retention {
            self.storage
                .trim_array_prefix(INSIGHTS, participant_key, INSIGHTS_FIELD, length - self.retention)
                .await?;
        }

        tracing::debug!(participant = participant_key, length, "Insight recorded");
        Ok(())
    }

    /// Up to the last `limit` insight texts, oldest first
    pub async fn recent(&self, participant_key: &str, limit: usize) -> JarvisResult<Vec<String>> {
        self.storage
            .array_slice(INSIGHTS, participant_key, INSIGHTS_FIELD, ArraySlice::Tail(limit))
            .await?
            .into_iter()
            .map(|value| {
                serde_json::from_value::<Insight>(value)
                    .map(|insight| insight.text)
                    .map_err(|e| JarvisError::serialization("deserialize_insight", e))
            })
            .collect()
    }
}
