//! Memory configuration

use super::compaction::CompactionPolicy;
use crate::error::{JarvisError, JarvisResult};
use serde::Deserialize;
use std::time::Duration;

/// Environment variable prefix read by [`MemoryConfig::from_env`]
pub const ENV_PREFIX: &str = "JARVIS";

/// Tunables of the memory manager
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Live length at which compaction fires
    pub trigger_threshold: usize,

    /// Oldest turns folded into one digest per compaction
    pub compact_batch_size: usize,

    /// Live turns included in a context snapshot (defaults to the threshold)
    pub recent_window: Option<usize>,

    /// Turns returned by `record_turn` for immediate display
    pub reply_tail: usize,

    /// Deadline for one summarizer call, in milliseconds
    pub summarize_timeout_ms: u64,

    /// Insights included in a context snapshot
    pub insight_window: usize,

    /// Insights kept per participant; older ones are dropped
    pub insight_retention: usize,

    /// Extract a behavioral insight after each generated reply
    pub extract_insights: bool,
}

impl MemoryConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `.env` if present, then read `JARVIS_*` variables
    /// (`JARVIS_TRIGGER_THRESHOLD`, `JARVIS_COMPACT_BATCH_SIZE`, ...)
    pub fn from_env() -> JarvisResult<Self> {
        dotenv::dotenv().ok();

        let source = ::config::Config::builder()
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .map_err(|e| JarvisError::config(e.to_string()))?;

        Self::from_config(source)
    }

    /// Deserialize from any `config` source; missing keys keep defaults
    pub fn from_config(source: ::config::Config) -> JarvisResult<Self> {
        let parsed: Self = source
            .try_deserialize()
            .map_err(|e| JarvisError::config(e.to_string()))?;

        parsed.validate()?;
        Ok(parsed)
    }

    /// Set the compaction trigger threshold
    pub fn with_trigger_threshold(mut self, threshold: usize) -> Self {
        self.trigger_threshold = threshold;
        self
    }

    /// Set the compaction batch size
    pub fn with_compact_batch_size(mut self, batch_size: usize) -> Self {
        self.compact_batch_size = batch_size;
        self
    }

    /// Set the snapshot window
    pub fn with_recent_window(mut self, window: usize) -> Self {
        self.recent_window = Some(window);
        self
    }

    /// Set the tail length returned by `record_turn`
    pub fn with_reply_tail(mut self, tail: usize) -> Self {
        self.reply_tail = tail;
        self
    }

    /// Set the summarizer deadline (millisecond precision)
    pub fn with_summarize_timeout(mut self, timeout: Duration) -> Self {
        self.summarize_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the snapshot insight window
    pub fn with_insight_window(mut self, window: usize) -> Self {
        self.insight_window = window;
        self
    }

    /// Set how many insights are kept per participant
    pub fn with_insight_retention(mut self, retention: usize) -> Self {
        self.insight_retention = retention;
        self
    }

    /// Enable/disable insight extraction
    pub fn with_insight_extraction(mut self, enable: bool) -> Self {
        self.extract_insights = enable;
        self
    }

    /// Snapshot window, falling back to the trigger threshold
    pub fn recent_window(&self) -> usize {
        self.recent_window.unwrap_or(self.trigger_threshold)
    }

    /// Summarizer deadline
    pub fn summarize_timeout(&self) -> Duration {
        Duration::from_millis(self.summarize_timeout_ms)
    }

    /// Check every setting, returning the compaction policy.
    ///
    /// Rejects invalid thresholds, a zero summarizer deadline, and an
    /// insight retention smaller than the insight window.
    pub fn validate(&self) -> JarvisResult<CompactionPolicy> {
        let policy = self.compaction_policy()?;

        if self.summarize_timeout_ms == 0 {
            return Err(JarvisError::validation(
                "summarize_timeout_ms",
                "must be greater than zero",
                "0",
            ));
        }

        if self.insight_retention == 0 || self.insight_retention < self.insight_window {
            return Err(JarvisError::validation(
                "insight_retention",
                format!("must be at least insight_window ({}) and non-zero", self.insight_window),
                self.insight_retention.to_string(),
            ));
        }

        Ok(policy)
    }

    /// Validated compaction policy for these thresholds
    pub fn compaction_policy(&self) -> JarvisResult<CompactionPolicy> {
        CompactionPolicy::new(self.trigger_threshold, self.compact_batch_size)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            trigger_threshold: 20,
            compact_batch_size: 10,
            recent_window: None,
            reply_tail: 10,
            summarize_timeout_ms: 30_000,
            insight_window: 5,
            insight_retention: 50,
            extract_insights: true,
        }
    }
}
