//! Summarizers turn a batch of old turns into a short digest

use super::conversation::{Role, Turn};
use super::generation::{summary_prompt, TextGenerator};
use crate::error::{JarvisError, JarvisResult};
use async_trait::async_trait;

/// What a summarizer knows about the batch owner
#[derive(Debug, Clone, Default)]
pub struct SummaryContext {
    /// Participant whose turns are being summarized
    pub participant_key: String,

    /// Text of the most recent digest, if any
    pub previous_summary: Option<String>,
}

/// External summarization contract
///
/// Failures ([`JarvisError::Upstream`], [`JarvisError::Timeout`]) are
/// treated by the manager as "retry later": the batch stays in the log.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Condense `turns` (oldest first) into a digest
    async fn summarize(&self, turns: &[Turn], context: &SummaryContext) -> JarvisResult<String>;
}

/// Offline summarizer that quotes the opening of each participant message
#[derive(Debug, Clone)]
pub struct ExtractiveSummarizer {
    max_chars: usize,
}

impl ExtractiveSummarizer {
    /// Create a summarizer with a 400 character digest limit
    pub fn new() -> Self {
        Self { max_chars: 400 }
    }

    /// Set the digest length limit
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

/// First sentence (or line) of a message
fn lead_sentence(text: &str) -> &str {
    let text = text.trim();
    let end = text
        .find(|c: char| matches!(c, '.' | '?' | '!' | '\n'))
        .map_or(text.len(), |i| i + 1);
    text[..end].trim()
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, turns: &[Turn], _context: &SummaryContext) -> JarvisResult<String> {
        let topics: Vec<&str> = turns
            .iter()
            .filter(|t| t.role == Role::User)
            .map(|t| lead_sentence(&t.text))
            .filter(|s| !s.is_empty())
            .collect();

        let mut digest = format!("{} turns. ", turns.len());
        if topics.is_empty() {
            digest.push_str("No participant messages.");
        } else {
            digest.push_str("Participant raised: ");
            digest.push_str(&topics.join(" | "));
        }

        if digest.chars().count() > self.max_chars {
            digest = digest.chars().take(self.max_chars.saturating_sub(3)).collect();
            digest.push_str("...");
        }

        Ok(digest)
    }
}

/// Summarizer that asks a generation engine for the digest
pub struct PromptSummarizer<G> {
    generator: G,
}

impl<G: TextGenerator> PromptSummarizer<G> {
    /// Wrap a generation engine
    pub fn new(generator: G) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl<G: TextGenerator> Summarizer for PromptSummarizer<G> {
    async fn summarize(&self, turns: &[Turn], context: &SummaryContext) -> JarvisResult<String> {
        if turns.is_empty() {
            return Err(JarvisError::validation(
                "turns",
                "must not be empty",
                "0 turns provided",
            ));
        }

        let prompt = summary_prompt(turns, context.previous_summary.as_deref());
        let summary = self.generator.generate(&prompt).await?;
        Ok(summary.trim().to_string())
    }
}
