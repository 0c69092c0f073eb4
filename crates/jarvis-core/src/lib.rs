//! # Jarvis Core
//!
//! Conversational memory for a hackathon coordinator assistant: every
//! participant gets a bounded live log, an archive of summaries that replaced
//! older turns, and a context snapshot assembled for the next reply.
//!
//! ## Modules
//!
//! - [`memory`]: live log, compaction, summaries, facts, context assembly
//! - [`storage`]: keyed JSON document store and an in-memory backend
//! - [`error`]: error taxonomy shared by every component
//!
//! Generation engines and summarizers are injected through traits; the core
//! never talks to a model directly.

#![warn(missing_docs)]

pub mod error;
pub mod memory;
pub mod storage;

pub use error::{JarvisError, JarvisResult};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
