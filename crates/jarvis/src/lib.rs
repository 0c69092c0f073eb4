//! # Jarvis - Hackathon Coordinator Memory
//!
//! **Jarvis** keeps a bounded conversational memory per participant:
//!
//! - **Live log**: the most recent turns, in order
//! - **Summary archive**: digests standing in for evicted turns
//! - **Context snapshots**: recent turns, latest digest, goals,
//!   instructions and insights, assembled for the next reply
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jarvis::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let memory = MemoryManager::builder(Arc::new(InMemoryStorage::new()))
//!         .with_config(MemoryConfig::from_env()?)
//!         .build()?;
//!
//!     memory
//!         .record_turn("MEM_01", "We picked Postgres.", "Good choice for the schema.")
//!         .await?;
//!
//!     let snapshot = memory.get_context("MEM_01").await?;
//!     println!("{} recent turns", snapshot.recent_turns.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!            MemoryManager
//!     (per-participant write lock)
//!        |         |          |
//!   EntityLog  Summarizer  ContextAssembler
//!        |         |          |
//!        +--- SummaryArchive  +-- goals / instructions / insights
//! ```

#![warn(missing_docs)]

// Re-export sub-crates
#[cfg(feature = "core")]
pub use jarvis_core as memory_core;

/// Commonly used types and traits
pub mod prelude {
    #[cfg(feature = "core")]
    pub use crate::memory_core::{
        error::{JarvisError, JarvisResult},
        storage::{DocumentStore, InMemoryStorage},
    };

    #[cfg(feature = "core")]
    pub use crate::memory_core::memory::{
        CompactionPolicy, CompactionStatus, ContextSnapshot, ExtractiveSummarizer, Goal,
        Instruction, InstructionTarget, MemoryConfig, MemoryManager, Participant, PlanHistory,
        PlanRecord, Prompt, PromptSummarizer, RecordOutcome, Reply, StoredFacts, Summarizer, Team,
        TextGenerator, Turn,
    };
}
