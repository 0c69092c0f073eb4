//! Memory manager - records turns, compacts old ones, serves context

use super::archive::{SummaryArchive, SummaryDigest};
use super::compaction::{CompactionDecision, CompactionPolicy};
use super::config::MemoryConfig;
use super::context::{ContextAssembler, ContextSnapshot};
use super::conversation::{EntityLog, EntityLogStore, Turn};
use super::facts::{Directory, GoalSource, InstructionSource, StoredFacts};
use super::generation::{insight_prompt, plan_prompt, plan_summary_prompt, reply_prompt, TextGenerator};
use super::insights::InsightLog;
use super::locks::KeyedLocks;
use super::plans::{PlanHistory, PlanRecord};
use super::summarizer::{ExtractiveSummarizer, Summarizer, SummaryContext};
use crate::error::{JarvisError, JarvisResult};
use crate::storage::DocumentStore;
use chrono::Utc;
use std::sync::Arc;

/// What happened to the log after a turn pair was recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionStatus {
    /// No threshold was crossed and nothing was owed
    NotDue,

    /// The oldest batch was archived and evicted
    Compacted {
        /// Identifier of the new digest
        digest_id: String,
        /// Turns folded into the digest
        source_turn_count: usize,
        /// Live length after eviction
        remaining: usize,
    },

    /// Summarization or storage failed; the batch stays live and the
    /// compaction is retried on the next append
    Deferred {
        /// Failure description
        reason: String,
    },

    /// The batch could not be extracted; nothing was changed
    Skipped {
        /// Failure description
        reason: String,
    },
}

impl CompactionStatus {
    /// Whether a digest was produced
    pub fn is_compacted(&self) -> bool {
        matches!(self, CompactionStatus::Compacted { .. })
    }
}

/// Result of [`MemoryManager::record_turn`]
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    /// Most recent live turns, oldest first
    pub tail: Vec<Turn>,

    /// Compaction outcome of this append
    pub compaction: CompactionStatus,
}

/// Result of [`MemoryManager::respond`]
#[derive(Debug, Clone)]
pub struct Reply {
    /// Generated assistant text, already recorded
    pub assistant_text: String,

    /// Most recent live turns, oldest first
    pub tail: Vec<Turn>,

    /// Compaction outcome of the recorded pair
    pub compaction: CompactionStatus,
}

/// Builder for [`MemoryManager`]
pub struct MemoryManagerBuilder {
    storage: Arc<dyn DocumentStore>,
    summarizer: Option<Arc<dyn Summarizer>>,
    goals: Option<Arc<dyn GoalSource>>,
    instructions: Option<Arc<dyn InstructionSource>>,
    directory: Option<Arc<dyn Directory>>,
    config: MemoryConfig,
}

impl MemoryManagerBuilder {
    /// Start a builder over a document store
    pub fn new(storage: Arc<dyn DocumentStore>) -> Self {
        Self {
            storage,
            summarizer: None,
            goals: None,
            instructions: None,
            directory: None,
            config: MemoryConfig::default(),
        }
    }

    /// Use a specific summarizer (default: [`ExtractiveSummarizer`])
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Read goals from another source
    pub fn with_goal_source(mut self, goals: Arc<dyn GoalSource>) -> Self {
        self.goals = Some(goals);
        self
    }

    /// Read instructions from another source
    pub fn with_instruction_source(mut self, instructions: Arc<dyn InstructionSource>) -> Self {
        self.instructions = Some(instructions);
        self
    }

    /// Resolve participants and teams through another directory
    pub fn with_directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Set the configuration
    pub fn with_config(mut self, config: MemoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration and build the manager.
    ///
    /// Fact sources that were not supplied are served by [`StoredFacts`] over
    /// the same document store.
    pub fn build(self) -> JarvisResult<MemoryManager> {
        let policy = self.config.validate()?;
        let facts = Arc::new(StoredFacts::new(self.storage.clone()));
        let goals: Arc<dyn GoalSource> = match self.goals {
            Some(goals) => goals,
            None => facts.clone(),
        };
        let instructions: Arc<dyn InstructionSource> = match self.instructions {
            Some(instructions) => instructions,
            None => facts.clone(),
        };
        let directory: Arc<dyn Directory> = match self.directory {
            Some(directory) => directory,
            None => facts,
        };
        let summarizer: Arc<dyn Summarizer> = match self.summarizer {
            Some(summarizer) => summarizer,
            None => Arc::new(ExtractiveSummarizer::new()),
        };

        let log = EntityLogStore::new(self.storage.clone());
        let archive = SummaryArchive::new(self.storage.clone());
        let plans = PlanHistory::new(self.storage.clone());
        let insights =
            InsightLog::new(self.storage.clone()).with_retention(self.config.insight_retention);

        let assembler = ContextAssembler::new(
            log.clone(),
            archive.clone(),
            insights.clone(),
            plans.clone(),
            goals,
            instructions,
            directory,
            self.config.recent_window(),
            self.config.insight_window,
        );

        tracing::debug!(
            trigger_threshold = policy.trigger_threshold(),
            batch_size = policy.compact_batch_size(),
            recent_window = self.config.recent_window(),
            "Memory manager configured"
        );

        Ok(MemoryManager {
            log,
            archive,
            insights,
            plans,
            assembler,
            summarizer,
            policy,
            config: self.config,
            locks: Arc::new(KeyedLocks::new()),
            planning: Arc::new(tokio::sync::Mutex::new(())),
        })
    }
}

/// Per-participant conversational memory
///
/// Writes for one participant are serialized behind a per-key lock held
/// across append, policy evaluation, and any compaction. Reads never take
/// the lock and observe the last committed turn pair. Clones share state.
#[derive(Clone)]
pub struct MemoryManager {
    log: EntityLogStore,
    archive: SummaryArchive,
    insights: InsightLog,
    plans: PlanHistory,
    assembler: ContextAssembler,
    summarizer: Arc<dyn Summarizer>,
    policy: CompactionPolicy,
    config: MemoryConfig,
    locks: Arc<KeyedLocks>,
    planning: Arc<tokio::sync::Mutex<()>>,
}

impl MemoryManager {
    /// Start a builder over a document store
    pub fn builder(storage: Arc<dyn DocumentStore>) -> MemoryManagerBuilder {
        MemoryManagerBuilder::new(storage)
    }

    /// Record one exchange and compact the log if it is due.
    ///
    /// Storage failures up to and including the append are returned; the
    /// pair is not recorded unless the store acknowledged it. Once it is,
    /// the call succeeds: compaction failures are reported in the outcome
    /// and never lose turns, and an unreadable tail comes back empty.
    pub async fn record_turn(
        &self,
        participant_key: &str,
        user_text: &str,
        assistant_text: &str,
    ) -> JarvisResult<RecordOutcome> {
        validate_key(participant_key)?;

        let _guard = self.locks.acquire(participant_key).await;

        let pending = self.log.is_compaction_pending(participant_key).await?;

        let now = Utc::now();
        let pair = [Turn::user(user_text, now), Turn::assistant(assistant_text, now)];
        let length = self.log.append(participant_key, &pair).await?;
        let previous = length.saturating_sub(pair.len());

        tracing::debug!(participant = participant_key, length, pending, "Turn pair recorded");

        let compaction = match self.policy.evaluate(previous, length, pending) {
            CompactionDecision::Hold => CompactionStatus::NotDue,
            CompactionDecision::Compact { batch_size } => {
                self.compact(participant_key, batch_size, pending).await
            }
        };

        // Recorded either way; an unreadable tail only costs the display view
        let tail = match self.log.tail(participant_key, self.config.reply_tail).await {
            Ok(tail) => tail,
            Err(e) => {
                tracing::warn!(
                    participant = participant_key,
                    error = %e,
                    "Failed to read tail after recording"
                );
                Vec::new()
            }
        };

        Ok(RecordOutcome { tail, compaction })
    }

    /// Assemble the context of a participant.
    ///
    /// Never waits on a write in progress. A participant with no history
    /// gets an empty snapshot.
    pub async fn get_context(&self, participant_key: &str) -> JarvisResult<ContextSnapshot> {
        validate_key(participant_key)?;
        self.assembler.assemble(participant_key).await
    }

    /// Stored log of a participant, or `NotFound` before the first turn
    pub async fn history(&self, participant_key: &str) -> JarvisResult<EntityLog> {
        validate_key(participant_key)?;
        self.log
            .load(participant_key)
            .await?
            .ok_or_else(|| JarvisError::not_found("entity_log", participant_key))
    }

    /// Generate a reply from the participant's context and record the
    /// exchange.
    ///
    /// A generation failure is returned before anything is recorded. When
    /// insight extraction is enabled, a one-sentence insight is captured
    /// afterwards; its failures are logged and ignored.
    pub async fn respond(
        &self,
        participant_key: &str,
        user_text: &str,
        generator: &dyn TextGenerator,
    ) -> JarvisResult<Reply> {
        let snapshot = self.get_context(participant_key).await?;

        let assistant_text = generator
            .generate(&reply_prompt(&snapshot, user_text))
            .await?
            .trim()
            .to_string();

        let outcome = self
            .record_turn(participant_key, user_text, &assistant_text)
            .await?;

        if self.config.extract_insights {
            self.capture_insight(&snapshot, user_text, &assistant_text, generator)
                .await;
        }

        Ok(Reply {
            assistant_text,
            tail: outcome.tail,
            compaction: outcome.compaction,
        })
    }

    /// Run one planning cycle: generate a plan that builds on the latest
    /// plan summary, condense it, and save both.
    ///
    /// Cycles are serialized so each one sees its predecessor. Generation
    /// failures and blank output are returned and nothing is saved.
    pub async fn plan_cycle(
        &self,
        owner_key: &str,
        problem_statement: &str,
        generator: &dyn TextGenerator,
    ) -> JarvisResult<PlanRecord> {
        validate_key(owner_key)?;

        let _guard = self.planning.lock().await;

        let previous = self.plans.latest().await?.map(|plan| plan.summary_text);
        if previous.is_some() {
            tracing::debug!(owner = owner_key, "Building on previous plan");
        }

        let plan_text = generator
            .generate(&plan_prompt(problem_statement, previous.as_deref()))
            .await?;
        if plan_text.trim().is_empty() {
            return Err(JarvisError::upstream("generate_plan", "empty plan"));
        }

        let summary_text = generator
            .generate(&plan_summary_prompt(&plan_text))
            .await?;
        if summary_text.trim().is_empty() {
            return Err(JarvisError::upstream("summarize_plan", "empty plan summary"));
        }

        self.plans.save(owner_key, &plan_text, &summary_text).await
    }

    /// Digest archive
    pub fn archive(&self) -> &SummaryArchive {
        &self.archive
    }

    /// Live log store
    pub fn log(&self) -> &EntityLogStore {
        &self.log
    }

    /// Insight log
    pub fn insights(&self) -> &InsightLog {
        &self.insights
    }

    /// Shared plan history
    pub fn plans(&self) -> &PlanHistory {
        &self.plans
    }

    /// Active compaction policy
    pub fn policy(&self) -> CompactionPolicy {
        self.policy
    }

    /// Get configuration
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Run one compaction and settle the pending marker.
    async fn compact(&self, participant_key: &str, batch_size: usize, was_pending: bool) -> CompactionStatus {
        match self.try_compact(participant_key, batch_size).await {
            Ok((digest, remaining)) => {
                let owed = self.policy.is_backlogged(remaining);
                if owed != was_pending {
                    self.mark_pending(participant_key, owed).await;
                }

                tracing::info!(
                    participant = participant_key,
                    digest_id = %digest.id,
                    batch_size = digest.source_turn_count,
                    remaining,
                    "Compacted conversation"
                );

                CompactionStatus::Compacted {
                    digest_id: digest.id,
                    source_turn_count: digest.source_turn_count,
                    remaining,
                }
            }
            Err(JarvisError::OutOfRange { requested, available }) => {
                tracing::error!(
                    participant = participant_key,
                    batch_size = requested,
                    length = available,
                    "Compaction batch exceeds live log; skipping"
                );

                CompactionStatus::Skipped {
                    reason: format!("batch of {} exceeds {} live turns", requested, available),
                }
            }
            Err(e) => {
                tracing::warn!(
                    participant = participant_key,
                    batch_size,
                    error = %e,
                    "Compaction deferred"
                );

                if !was_pending {
                    self.mark_pending(participant_key, true).await;
                }

                CompactionStatus::Deferred {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Summarize the head batch, archive the digest, then evict the batch.
    ///
    /// Any failure before the archive append leaves the log untouched.
    async fn try_compact(
        &self,
        participant_key: &str,
        batch_size: usize,
    ) -> JarvisResult<(SummaryDigest, usize)> {
        let batch = self.log.head(participant_key, batch_size).await?;
        if batch.len() < batch_size {
            return Err(JarvisError::out_of_range(batch_size, batch.len()));
        }

        let context = SummaryContext {
            participant_key: participant_key.to_string(),
            previous_summary: self.archive.latest(participant_key).await?.map(|d| d.text),
        };

        let deadline = self.config.summarize_timeout();
        let text = match tokio::time::timeout(deadline, self.summarizer.summarize(&batch, &context)).await {
            Ok(result) => result?,
            Err(_) => return Err(JarvisError::timeout("summarize", deadline)),
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(JarvisError::upstream("summarize", "empty digest"));
        }

        let digest = SummaryDigest::new(participant_key, text, batch.len());
        self.archive.append(&digest).await?;

        // Held lock: the head cannot have changed since it was read
        let evicted = self.log.remove_prefix(participant_key, batch.len()).await?;
        let remaining = self.log.length(participant_key).await?;

        tracing::debug!(
            participant = participant_key,
            evicted = evicted.len(),
            "Evicted archived turns"
        );

        Ok((digest, remaining))
    }

    async fn mark_pending(&self, participant_key: &str, pending: bool) {
        if let Err(e) = self.log.set_compaction_pending(participant_key, pending).await {
            tracing::warn!(
                participant = participant_key,
                pending,
                error = %e,
                "Failed to persist compaction marker"
            );
        }
    }

    async fn capture_insight(
        &self,
        snapshot: &ContextSnapshot,
        user_text: &str,
        assistant_text: &str,
        generator: &dyn TextGenerator,
    ) {
        let prompt = insight_prompt(snapshot, user_text, assistant_text);
        let result = match generator.generate(&prompt).await {
            Ok(text) => self.insights.record(&snapshot.participant_key, &text).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            tracing::warn!(
                participant = %snapshot.participant_key,
                error = %e,
                "Insight extraction failed"
            );
        }
    }
}

fn validate_key(participant_key: &str) -> JarvisResult<()> {
    if participant_key.trim().is_empty() {
        return Err(JarvisError::validation(
            "participant_key",
            "must not be empty",
            participant_key,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::conversation::Role;
    use crate::memory::facts::{Goal, Instruction, InstructionTarget};
    use crate::memory::generation::Prompt;
    use crate::storage::{ArraySlice, InMemoryStorage, CONVERSATIONS};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn manager(storage: Arc<dyn DocumentStore>) -> MemoryManager {
        MemoryManager::builder(storage).build().unwrap()
    }

    fn memory() -> MemoryManager {
        manager(Arc::new(InMemoryStorage::new()))
    }

    /// Fails the first `failures` calls, then summarizes like the default
    struct Flaky {
        failures: AtomicUsize,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new(failures: usize) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Summarizer for Flaky {
        async fn summarize(&self, turns: &[Turn], context: &SummaryContext) -> JarvisResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(JarvisError::upstream("summarize", "model unavailable"));
            }
            ExtractiveSummarizer::new().summarize(turns, context).await
        }
    }

    struct Stalled;

    #[async_trait]
    impl Summarizer for Stalled {
        async fn summarize(&self, _turns: &[Turn], _context: &SummaryContext) -> JarvisResult<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("too late".to_string())
        }
    }

    /// Store that can be told to reject array appends
    struct Unreliable {
        inner: InMemoryStorage,
        reject_appends: AtomicBool,
        stamp_failures: AtomicUsize,
        reject_log_tails: AtomicBool,
    }

    impl Unreliable {
        fn new() -> Self {
            Self {
                inner: InMemoryStorage::new(),
                reject_appends: AtomicBool::new(false),
                stamp_failures: AtomicUsize::new(0),
                reject_log_tails: AtomicBool::new(false),
            }
        }

        fn offline(operation: &str) -> JarvisError {
            JarvisError::storage(
                operation,
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "store offline"),
            )
        }
    }

    #[async_trait]
    impl DocumentStore for Unreliable {
        async fn read(&self, collection: &str, key: &str) -> JarvisResult<Option<Value>> {
            self.inner.read(collection, key).await
        }

        async fn write(&self, collection: &str, key: &str, document: Value) -> JarvisResult<()> {
            self.inner.write(collection, key, document).await
        }

        async fn delete(&self, collection: &str, key: &str) -> JarvisResult<bool> {
            self.inner.delete(collection, key).await
        }

        async fn list(&self, collection: &str) -> JarvisResult<Vec<(String, Value)>> {
            self.inner.list(collection).await
        }

        async fn set_field(&self, collection: &str, key: &str, field: &str, value: Value) -> JarvisResult<()> {
            if field == "updated_at" {
                let left = self.stamp_failures.load(Ordering::SeqCst);
                if left > 0 {
                    self.stamp_failures.store(left - 1, Ordering::SeqCst);
                    return Err(Self::offline("set_field"));
                }
            }
            self.inner.set_field(collection, key, field, value).await
        }

        async fn append_to_array(
            &self,
            collection: &str,
            key: &str,
            field: &str,
            values: Vec<Value>,
        ) -> JarvisResult<usize> {
            if self.reject_appends.load(Ordering::SeqCst) {
                return Err(Self::offline("append_to_array"));
            }
            self.inner.append_to_array(collection, key, field, values).await
        }

        async fn array_len(&self, collection: &str, key: &str, field: &str) -> JarvisResult<usize> {
            self.inner.array_len(collection, key, field).await
        }

        async fn array_slice(
            &self,
            collection: &str,
            key: &str,
            field: &str,
            slice: ArraySlice,
        ) -> JarvisResult<Vec<Value>> {
            let log_tail = collection == CONVERSATIONS && matches!(slice, ArraySlice::Tail(_));
            if log_tail && self.reject_log_tails.load(Ordering::SeqCst) {
                return Err(Self::offline("array_slice"));
            }
            self.inner.array_slice(collection, key, field, slice).await
        }

        async fn trim_array_prefix(
            &self,
            collection: &str,
            key: &str,
            field: &str,
            count: usize,
        ) -> JarvisResult<Vec<Value>> {
            self.inner.trim_array_prefix(collection, key, field, count).await
        }
    }

    /// Replies with a fixed text, or an insight when asked for one
    struct Scripted;

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, prompt: &Prompt) -> JarvisResult<String> {
            if prompt.system.starts_with("Extract user status") {
                Ok("Working on authentication.".to_string())
            } else {
                Ok(" Start with the login route. ".to_string())
            }
        }
    }

    /// Answers plan and plan-summary prompts, keeping every prompt it saw
    struct Planner {
        prompts: parking_lot::Mutex<Vec<Prompt>>,
    }

    #[async_trait]
    impl TextGenerator for Planner {
        async fn generate(&self, prompt: &Prompt) -> JarvisResult<String> {
            let mut prompts = self.prompts.lock();
            prompts.push(prompt.clone());
            if prompt.system.starts_with("Summarize") {
                Ok(format!("Summary of plan {}", prompts.len() / 2))
            } else {
                Ok("Phase 1: Setup\nPhase 2: MVP".to_string())
            }
        }
    }

    struct Offline;

    #[async_trait]
    impl TextGenerator for Offline {
        async fn generate(&self, _prompt: &Prompt) -> JarvisResult<String> {
            Err(JarvisError::upstream("generate", "engine offline"))
        }
    }

    async fn record(memory: &MemoryManager, key: &str, i: usize) -> RecordOutcome {
        memory
            .record_turn(key, &format!("q{}", i), &format!("a{}", i))
            .await
            .unwrap()
    }

    fn assert_pairs(turns: &[Turn]) {
        assert_eq!(turns.len() % 2, 0);
        for pair in turns.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[0].text[1..], pair[1].text[1..]);
        }
    }

    #[tokio::test]
    async fn test_record_preserves_order_and_returns_tail() {
        let memory = memory();
        for i in 1..=3 {
            record(&memory, "MEM_01", i).await;
        }
        let outcome = record(&memory, "MEM_01", 4).await;

        assert_eq!(outcome.compaction, CompactionStatus::NotDue);
        let texts: Vec<_> = outcome.tail.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["q1", "a1", "q2", "a2", "q3", "a3", "q4", "a4"]);
    }

    #[tokio::test]
    async fn test_tail_is_bounded_by_reply_tail() {
        let memory = memory();
        let mut outcome = record(&memory, "MEM_01", 1).await;
        for i in 2..=8 {
            outcome = record(&memory, "MEM_01", i).await;
        }

        assert_eq!(outcome.tail.len(), 10);
        assert_eq!(outcome.tail[0].text, "q4");
    }

    #[tokio::test]
    async fn test_compaction_is_exact_at_threshold() {
        let memory = memory();
        for i in 1..=9 {
            let outcome = record(&memory, "MEM_01", i).await;
            assert_eq!(outcome.compaction, CompactionStatus::NotDue);
        }

        let outcome = record(&memory, "MEM_01", 10).await;
        match outcome.compaction {
            CompactionStatus::Compacted {
                source_turn_count,
                remaining,
                ..
            } => {
                assert_eq!(source_turn_count, 10);
                assert_eq!(remaining, 10);
            }
            other => panic!("expected compaction, got {:?}", other),
        }

        assert_eq!(memory.log().length("MEM_01").await.unwrap(), 10);
        let digests = memory.archive().all("MEM_01").await.unwrap();
        assert_eq!(digests.len(), 1);
        assert_eq!(digests[0].source_turn_count, 10);
        assert!(digests[0].text.contains("q1"));

        let live = memory.log().tail("MEM_01", 20).await.unwrap();
        assert_eq!(live[0].text, "q6");
    }

    #[tokio::test]
    async fn test_no_double_compaction() {
        let memory = memory();
        let mut fired = Vec::new();
        for i in 1..=30 {
            if record(&memory, "MEM_01", i).await.compaction.is_compacted() {
                fired.push(i);
            }
        }

        // Live length oscillates between 10 and 20 after the first crossing
        assert_eq!(fired, vec![10, 15, 20, 25, 30]);
        assert_eq!(memory.archive().count("MEM_01").await.unwrap(), 5);
        assert_eq!(memory.log().length("MEM_01").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_failed_summary_defers_without_eviction() {
        let summarizer = Arc::new(Flaky::new(1));
        let memory = MemoryManager::builder(Arc::new(InMemoryStorage::new()))
            .with_summarizer(summarizer.clone())
            .build()
            .unwrap();

        for i in 1..=9 {
            record(&memory, "MEM_01", i).await;
        }
        let outcome = record(&memory, "MEM_01", 10).await;

        assert!(matches!(outcome.compaction, CompactionStatus::Deferred { .. }));
        assert_eq!(memory.log().length("MEM_01").await.unwrap(), 20);
        assert_eq!(memory.archive().count("MEM_01").await.unwrap(), 0);
        assert!(memory.log().is_compaction_pending("MEM_01").await.unwrap());

        // The next append retries even though no multiple was crossed
        let outcome = record(&memory, "MEM_01", 11).await;
        assert!(outcome.compaction.is_compacted());
        assert_eq!(memory.log().length("MEM_01").await.unwrap(), 12);
        assert_eq!(memory.archive().count("MEM_01").await.unwrap(), 1);
        assert!(!memory.log().is_compaction_pending("MEM_01").await.unwrap());
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 2);

        let history = memory.history("MEM_01").await.unwrap();
        assert_eq!(history.turns[0].text, "q6");
        assert!(!history.compaction_pending);
    }

    #[tokio::test]
    async fn test_backlog_drains_one_batch_per_append() {
        let memory = MemoryManager::builder(Arc::new(InMemoryStorage::new()))
            .with_summarizer(Arc::new(Flaky::new(6)))
            .build()
            .unwrap();

        for i in 1..=15 {
            let outcome = record(&memory, "MEM_01", i).await;
            if i >= 10 {
                assert!(matches!(outcome.compaction, CompactionStatus::Deferred { .. }));
            }
        }
        assert_eq!(memory.log().length("MEM_01").await.unwrap(), 30);

        // 32 -> 22, still backlogged
        let outcome = record(&memory, "MEM_01", 16).await;
        assert!(outcome.compaction.is_compacted());
        assert!(memory.log().is_compaction_pending("MEM_01").await.unwrap());

        // 24 -> 14, drained
        let outcome = record(&memory, "MEM_01", 17).await;
        assert!(outcome.compaction.is_compacted());
        assert!(!memory.log().is_compaction_pending("MEM_01").await.unwrap());
        assert_eq!(memory.log().length("MEM_01").await.unwrap(), 14);

        let outcome = record(&memory, "MEM_01", 18).await;
        assert_eq!(outcome.compaction, CompactionStatus::NotDue);
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_timeout_leaves_log_untouched() {
        let memory = MemoryManager::builder(Arc::new(InMemoryStorage::new()))
            .with_summarizer(Arc::new(Stalled))
            .with_config(MemoryConfig::new().with_summarize_timeout(Duration::from_secs(5)))
            .build()
            .unwrap();

        for i in 1..=9 {
            record(&memory, "MEM_01", i).await;
        }
        let outcome = record(&memory, "MEM_01", 10).await;

        match outcome.compaction {
            CompactionStatus::Deferred { reason } => assert!(reason.contains("summarize")),
            other => panic!("expected deferral, got {:?}", other),
        }
        assert_eq!(memory.log().length("MEM_01").await.unwrap(), 20);
        assert_eq!(memory.archive().count("MEM_01").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_on_append_propagates() {
        let store = Arc::new(Unreliable::new());
        let memory = manager(store.clone());
        record(&memory, "MEM_01", 1).await;

        store.reject_appends.store(true, Ordering::SeqCst);
        let err = assert_err!(memory.record_turn("MEM_01", "q2", "a2").await);
        assert_eq!(err.category(), "storage");

        store.reject_appends.store(false, Ordering::SeqCst);
        assert_eq!(memory.log().length("MEM_01").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_timestamp_still_counts_as_recorded() {
        let store = Arc::new(Unreliable::new());
        let memory = manager(store.clone());
        for i in 1..=9 {
            record(&memory, "MEM_01", i).await;
        }

        store.stamp_failures.store(1, Ordering::SeqCst);
        let outcome = assert_ok!(memory.record_turn("MEM_01", "q10", "a10").await);

        // The crossing at 20 turns is still evaluated
        assert!(outcome.compaction.is_compacted());
        assert_eq!(memory.log().length("MEM_01").await.unwrap(), 10);

        let mut max_len = 0;
        for i in 11..=30 {
            record(&memory, "MEM_01", i).await;
            max_len = max_len.max(memory.log().length("MEM_01").await.unwrap());
        }
        assert!(max_len <= 20);
        assert_eq!(memory.archive().count("MEM_01").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_unreadable_tail_still_reports_outcome() {
        let store = Arc::new(Unreliable::new());
        let memory = manager(store.clone());
        for i in 1..=9 {
            record(&memory, "MEM_01", i).await;
        }

        store.reject_log_tails.store(true, Ordering::SeqCst);
        let outcome = assert_ok!(memory.record_turn("MEM_01", "q10", "a10").await);
        store.reject_log_tails.store(false, Ordering::SeqCst);

        assert!(outcome.tail.is_empty());
        assert!(outcome.compaction.is_compacted());
        assert_eq!(memory.log().length("MEM_01").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_archive_failure_defers_compaction() {
        let store = Arc::new(Unreliable::new());
        let memory = manager(store.clone());
        for i in 1..=9 {
            record(&memory, "MEM_01", i).await;
        }

        let outcome = record(&memory, "MEM_01", 10).await;
        assert!(outcome.compaction.is_compacted());

        store.reject_appends.store(true, Ordering::SeqCst);
        let status = memory.compact("MEM_01", 10, false).await;
        assert!(matches!(status, CompactionStatus::Deferred { .. }));
        assert_eq!(memory.log().length("MEM_01").await.unwrap(), 10);
        assert_eq!(memory.archive().count("MEM_01").await.unwrap(), 1);
        assert!(memory.log().is_compaction_pending("MEM_01").await.unwrap());
    }

    #[tokio::test]
    async fn test_oversized_batch_is_skipped() {
        let memory = memory();
        record(&memory, "MEM_01", 1).await;

        let status = memory.compact("MEM_01", 10, false).await;
        assert!(matches!(status, CompactionStatus::Skipped { .. }));
        assert_eq!(memory.log().length("MEM_01").await.unwrap(), 2);
        assert!(!memory.log().is_compaction_pending("MEM_01").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_on_one_participant() {
        let memory = Arc::new(memory());

        let tasks: Vec<_> = (1..=10)
            .map(|i| {
                let memory = memory.clone();
                tokio::spawn(async move { record(&memory, "MEM_01", i).await })
            })
            .collect();

        let compactions = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .filter(|o| o.compaction.is_compacted())
            .count();

        assert_eq!(compactions, 1);
        assert_eq!(memory.archive().count("MEM_01").await.unwrap(), 1);

        let live = memory.log().tail("MEM_01", 20).await.unwrap();
        assert_eq!(live.len(), 10);
        assert_pairs(&live);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_participants_are_independent() {
        let memory = Arc::new(memory());

        let tasks: Vec<_> = ["MEM_01", "MEM_02", "MEM_03"]
            .into_iter()
            .map(|key| {
                let memory = memory.clone();
                tokio::spawn(async move {
                    for i in 1..=12 {
                        record(&memory, key, i).await;
                    }
                })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }

        for key in ["MEM_01", "MEM_02", "MEM_03"] {
            assert_eq!(memory.log().length(key).await.unwrap(), 14);
            assert_eq!(memory.archive().count(key).await.unwrap(), 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_see_half_a_pair() {
        let memory = Arc::new(memory());

        let writer = {
            let memory = memory.clone();
            tokio::spawn(async move {
                for i in 1..=40 {
                    record(&memory, "MEM_01", i).await;
                }
            })
        };

        while !writer.is_finished() {
            let snapshot = memory.get_context("MEM_01").await.unwrap();
            assert_pairs(&snapshot.recent_turns);
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_participant() {
        let memory = memory();

        let snapshot = assert_ok!(memory.get_context("MEM_404").await);
        assert!(snapshot.recent_turns.is_empty());
        assert!(snapshot.latest_summary.is_none());
        assert!(snapshot.active_goals.is_empty());
        assert!(snapshot.applicable_instructions.is_empty());

        let err = assert_err!(memory.history("MEM_404").await);
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_blank_key_is_rejected() {
        let memory = memory();
        let err = assert_err!(memory.record_turn("  ", "q", "a").await);
        assert_eq!(err.category(), "validation");

        let err = assert_err!(memory.history("").await);
        assert_eq!(err.category(), "validation");
    }

    #[tokio::test]
    async fn test_context_reflects_latest_digest_and_facts() {
        let storage: Arc<dyn DocumentStore> = Arc::new(InMemoryStorage::new());
        let facts = StoredFacts::new(storage.clone());
        facts.put_goal(&Goal::new("MEM_01", "Ship auth")).await.unwrap();
        facts
            .issue_instruction(&Instruction::new("lead", InstructionTarget::All, "Demo at 18:00"))
            .await
            .unwrap();

        let memory = manager(storage);
        for i in 1..=10 {
            record(&memory, "MEM_01", i).await;
        }

        let snapshot = memory.get_context("MEM_01").await.unwrap();
        assert_eq!(snapshot.recent_turns.len(), 10);
        assert!(snapshot.latest_summary.unwrap().starts_with("10 turns."));
        assert!(snapshot.active_goals.contains("Ship auth"));
        assert!(snapshot.applicable_instructions.contains("Demo at 18:00"));
    }

    #[tokio::test]
    async fn test_respond_records_reply_and_insight() {
        let memory = memory();

        let reply = memory
            .respond("MEM_01", "Where do I start with auth?", &Scripted)
            .await
            .unwrap();

        assert_eq!(reply.assistant_text, "Start with the login route.");
        assert_eq!(reply.tail.len(), 2);
        assert_eq!(reply.tail[1].text, "Start with the login route.");
        assert_eq!(reply.compaction, CompactionStatus::NotDue);

        let insights = memory.insights().recent("MEM_01", 5).await.unwrap();
        assert_eq!(insights, vec!["Working on authentication.".to_string()]);
    }

    #[tokio::test]
    async fn test_respond_without_insights() {
        let memory = MemoryManager::builder(Arc::new(InMemoryStorage::new()))
            .with_config(MemoryConfig::new().with_insight_extraction(false))
            .build()
            .unwrap();

        memory.respond("MEM_01", "hello", &Scripted).await.unwrap();
        assert!(memory.insights().recent("MEM_01", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generation_failure_records_nothing() {
        let memory = memory();

        let err = assert_err!(memory.respond("MEM_01", "hello", &Offline).await);
        assert!(err.is_retryable());
        assert_eq!(memory.log().length("MEM_01").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_plan_cycle_builds_on_previous_plan() {
        let memory = memory();
        let planner = Planner {
            prompts: parking_lot::Mutex::new(Vec::new()),
        };

        let first = memory
            .plan_cycle("MEM_01", "Clinic triage app", &planner)
            .await
            .unwrap();
        assert_eq!(first.summary_text, "Summary of plan 1");
        assert!(first.plan_text.contains("Phase 2: MVP"));

        let second = memory
            .plan_cycle("MEM_02", "Clinic triage app", &planner)
            .await
            .unwrap();
        assert_eq!(second.summary_text, "Summary of plan 2");

        {
            let prompts = planner.prompts.lock();
            assert_eq!(prompts.len(), 4);
            assert!(!prompts[0].user.contains("PREVIOUS PLAN CONTEXT"));
            assert!(prompts[2].user.contains("Summary of plan 1"));
        }

        assert_eq!(memory.plans().count().await.unwrap(), 2);
        let snapshot = memory.get_context("MEM_03").await.unwrap();
        assert_eq!(snapshot.latest_plan_summary.as_deref(), Some("Summary of plan 2"));
    }

    #[tokio::test]
    async fn test_failed_plan_cycle_saves_nothing() {
        let memory = memory();

        let err = assert_err!(memory.plan_cycle("MEM_01", "Clinic triage", &Offline).await);
        assert!(err.is_retryable());
        assert!(memory.plans().latest().await.unwrap().is_none());
    }

    #[test]
    fn test_builder_rejects_invalid_policy() {
        let result = MemoryManager::builder(Arc::new(InMemoryStorage::new()))
            .with_config(MemoryConfig::new().with_trigger_threshold(4))
            .build();
        assert!(result.is_err());
    }
}
