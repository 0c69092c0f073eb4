//! Plan history - project plans and the summaries that seed the next one
//!
//! Plans are shared by every participant: each planning cycle builds on the
//! summary of the most recent plan, whoever requested it.

use crate::error::{JarvisError, JarvisResult};
use crate::storage::{ArraySlice, DocumentStore, PLANS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const PLAN_LOG_KEY: &str = "shared";
const PLANS_FIELD: &str = "plans";

/// One generated plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    /// Unique identifier
    pub id: String,

    /// Participant who started the planning cycle
    pub owner_key: String,

    /// Full step-by-step plan
    pub plan_text: String,

    /// Condensed plan, fed into the next cycle
    pub summary_text: String,

    /// When the plan was saved
    pub created_at: DateTime<Utc>,
}

/// Append-only, shared sequence of plans
#[derive(Clone)]
pub struct PlanHistory {
    storage: Arc<dyn DocumentStore>,
}

impl PlanHistory {
    /// Create a plan history over a document store
    pub fn new(storage: Arc<dyn DocumentStore>) -> Self {
        Self { storage }
    }

    /// Save a plan and its summary. Both texts must be non-blank.
    pub async fn save(
        &self,
        owner_key: &str,
        plan_text: &str,
        summary_text: &str,
    ) -> JarvisResult<PlanRecord> {
        for (field, text) in [("plan_text", plan_text), ("summary_text", summary_text)] {
            if text.trim().is_empty() {
                return Err(JarvisError::validation(field, "must not be blank", text));
            }
        }

        let record = PlanRecord {
            id: uuid::Uuid::new_v4().to_string(),
            owner_key: owner_key.to_string(),
            plan_text: plan_text.trim().to_string(),
            summary_text: summary_text.trim().to_string(),
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&record)
            .map_err(|e| JarvisError::serialization("serialize_plan", e))?;

        let count = self
            .storage
            .append_to_array(PLANS, PLAN_LOG_KEY, PLANS_FIELD, vec![value])
            .await?;

        tracing::info!(owner = owner_key, plan_id = %record.id, count, "Plan saved");
        Ok(record)
    }

    /// Most recent plan, if any
    pub async fn latest(&self) -> JarvisResult<Option<PlanRecord>> {
        Ok(self.read(ArraySlice::Tail(1)).await?.pop())
    }

    /// Up to `limit` plans, newest first
    pub async fn recent(&self, limit: usize) -> JarvisResult<Vec<PlanRecord>> {
        let mut plans = self.read(ArraySlice::Tail(limit)).await?;
        plans.reverse();
        Ok(plans)
    }

    /// Number of saved plans
    pub async fn count(&self) -> JarvisResult<usize> {
        self.storage.array_len(PLANS, PLAN_LOG_KEY, PLANS_FIELD).await
    }

    async fn read(&self, slice: ArraySlice) -> JarvisResult<Vec<PlanRecord>> {
        self.storage
            .array_slice(PLANS, PLAN_LOG_KEY, PLANS_FIELD, slice)
            .await?
            .into_iter()
            .map(value_to_plan)
            .collect()
    }
}

fn value_to_plan(value: Value) -> JarvisResult<PlanRecord> {
    serde_json::from_value(value).map_err(|e| JarvisError::serialization("deserialize_plan", e))
}
