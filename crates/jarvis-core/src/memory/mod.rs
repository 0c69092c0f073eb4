//! # Participant Memory
//!
//! Bounded, per-participant conversational memory with summary compaction.
//!
//! ## Tiers
//!
//! - **Live log**: the most recent turns of each participant, in order
//! - **Summary archive**: digests that replaced older turns, append-only
//! - **Auxiliary facts**: goals, instructions and profiles owned by other
//!   workflows, read here without locking
//! - **Insights**: one-sentence notes on what the participant is doing
//! - **Plan history**: shared project plans, each seeded by the summary of
//!   the one before
//!
//! ## Compaction
//!
//! Whenever an append carries the live length across a multiple of the
//! trigger threshold, the oldest batch is summarized, the digest is archived,
//! and only then is the batch evicted. A failed or timed-out summary leaves
//! the log untouched and the compaction is retried on the next append.
//!
//! ## Example
//!
//! ```rust,no_run
//! use jarvis_core::memory::{MemoryConfig, MemoryManager};
//! use jarvis_core::storage::InMemoryStorage;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Arc::new(InMemoryStorage::new());
//! let memory = MemoryManager::builder(storage)
//!     .with_config(MemoryConfig::new().with_trigger_threshold(20).with_compact_batch_size(10))
//!     .build()?;
//!
//! let outcome = memory
//!     .record_turn("MEM_01", "How do I add auth?", "Start with a login route.")
//!     .await?;
//! println!("{} live turns", outcome.tail.len());
//!
//! let snapshot = memory.get_context("MEM_01").await?;
//! println!("latest summary: {:?}", snapshot.latest_summary);
//! # Ok(())
//! # }
//! ```

mod archive;
mod compaction;
mod config;
mod context;
mod conversation;
mod facts;
mod generation;
mod insights;
mod locks;
mod manager;
mod plans;
mod summarizer;

pub use archive::{SummaryArchive, SummaryDigest};
pub use compaction::{CompactionDecision, CompactionPolicy};
pub use config::{MemoryConfig, ENV_PREFIX};
pub use context::{ContextAssembler, ContextSnapshot};
pub use conversation::{EntityLog, EntityLogStore, Role, Turn};
pub use facts::{
    Directory, Goal, GoalSource, GoalStatus, Instruction, InstructionSource, InstructionTarget,
    Participant, StoredFacts, Team,
};
pub use generation::{
    insight_prompt, plan_prompt, plan_summary_prompt, reply_prompt, summary_prompt, transcript,
    Prompt, TextGenerator,
};
pub use insights::{Insight, InsightLog, DEFAULT_INSIGHT_RETENTION};
pub use locks::{KeyedGuard, KeyedLocks};
pub use manager::{CompactionStatus, MemoryManager, MemoryManagerBuilder, RecordOutcome, Reply};
pub use plans::{PlanHistory, PlanRecord};
pub use summarizer::{ExtractiveSummarizer, PromptSummarizer, Summarizer, SummaryContext};
