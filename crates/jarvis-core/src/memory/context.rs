//! Context assembly
//!
//! A [`ContextSnapshot`] bundles everything a generation engine needs for a
//! participant: the live tail of the log, the latest digest, active goals,
//! applicable instructions, recent insights, profile records, and the
//! summary of the current project plan.
//!
//! Assembly is read-only. Each source is read independently, so a snapshot
//! taken during a `record_turn` reflects the last committed turn pair, not
//! necessarily the one in flight.

use super::archive::SummaryArchive;
use super::conversation::{EntityLogStore, Turn};
use super::facts::{Directory, GoalSource, GoalStatus, InstructionSource, Participant, Team};
use super::insights::InsightLog;
use super::plans::PlanHistory;
use crate::error::JarvisResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Composed, read-only context for one participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Participant the snapshot was assembled for
    pub participant_key: String,

    /// Registered profile, if the participant is known to the directory
    pub participant: Option<Participant>,

    /// The participant's team, if known
    pub team: Option<Team>,

    /// Live turns, oldest first (bounded by the recent window)
    pub recent_turns: Vec<Turn>,

    /// Text of the most recent digest
    pub latest_summary: Option<String>,

    /// Texts of active goals
    pub active_goals: BTreeSet<String>,

    /// Texts of active instructions addressed to the participant or to all
    pub applicable_instructions: BTreeSet<String>,

    /// Most recent behavioral insights, oldest first
    pub recent_insights: Vec<String>,

    /// Summary of the latest project plan (shared by all participants)
    #[serde(default)]
    pub latest_plan_summary: Option<String>,

    /// Assembly time
    pub assembled_at: DateTime<Utc>,
}

impl ContextSnapshot {
    /// Snapshot of a participant with no history and no facts
    pub fn empty(participant_key: impl Into<String>) -> Self {
        Self {
            participant_key: participant_key.into(),
            participant: None,
            team: None,
            recent_turns: Vec::new(),
            latest_summary: None,
            active_goals: BTreeSet::new(),
            applicable_instructions: BTreeSet::new(),
            recent_insights: Vec::new(),
            latest_plan_summary: None,
            assembled_at: Utc::now(),
        }
    }

    /// Whether nothing at all is known about the participant.
    /// The shared plan summary does not count.
    pub fn is_empty(&self) -> bool {
        self.participant.is_none()
            && self.recent_turns.is_empty()
            && self.latest_summary.is_none()
            && self.active_goals.is_empty()
            && self.applicable_instructions.is_empty()
            && self.recent_insights.is_empty()
    }
}

/// Builds [`ContextSnapshot`]s from the log, the archive and fact sources
#[derive(Clone)]
pub struct ContextAssembler {
    log: EntityLogStore,
    archive: SummaryArchive,
    insights: InsightLog,
    plans: PlanHistory,
    goals: Arc<dyn GoalSource>,
    instructions: Arc<dyn InstructionSource>,
    directory: Arc<dyn Directory>,
    recent_window: usize,
    insight_window: usize,
}

impl ContextAssembler {
    /// Create an assembler
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log: EntityLogStore,
        archive: SummaryArchive,
        insights: InsightLog,
        plans: PlanHistory,
        goals: Arc<dyn GoalSource>,
        instructions: Arc<dyn InstructionSource>,
        directory: Arc<dyn Directory>,
        recent_window: usize,
        insight_window: usize,
    ) -> Self {
        Self {
            log,
            archive,
            insights,
            plans,
            goals,
            instructions,
            directory,
            recent_window,
            insight_window,
        }
    }

    /// Number of live turns included in a snapshot
    pub fn recent_window(&self) -> usize {
        self.recent_window
    }

    /// Assemble the context of `participant_key`.
    ///
    /// An unknown participant yields an empty snapshot rather than an error.
    pub async fn assemble(&self, participant_key: &str) -> JarvisResult<ContextSnapshot> {
        let recent_turns = self.log.tail(participant_key, self.recent_window).await?;

        let latest_summary = self
            .archive
            .latest(participant_key)
            .await?
            .map(|digest| digest.text);

        let active_goals = self
            .goals
            .goals_for(participant_key)
            .await?
            .into_iter()
            .filter(|g| g.participant_key == participant_key && g.status == GoalStatus::Active)
            .map(|g| g.text)
            .collect();

        let applicable_instructions = self
            .instructions
            .instructions_for(participant_key)
            .await?
            .into_iter()
            .filter(|i| i.active && i.target.applies_to(participant_key))
            .map(|i| i.text)
            .collect();

        let recent_insights = self
            .insights
            .recent(participant_key, self.insight_window)
            .await?;

        let latest_plan_summary = self.plans.latest().await?.map(|plan| plan.summary_text);

        let participant = self.directory.participant(participant_key).await?;
        let team = match &participant {
            Some(p) => self.directory.team(&p.team_id).await?,
            None => None,
        };

        Ok(ContextSnapshot {
            participant_key: participant_key.to_string(),
            participant,
            team,
            recent_turns,
            latest_summary,
            active_goals,
            applicable_instructions,
            recent_insights,
            latest_plan_summary,
            assembled_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::archive::SummaryDigest;
    use crate::memory::facts::{Goal, Instruction, InstructionTarget, StoredFacts};
    use crate::storage::{DocumentStore, InMemoryStorage};

    fn assembler(storage: Arc<dyn DocumentStore>, window: usize) -> ContextAssembler {
        let facts = Arc::new(StoredFacts::new(storage.clone()));
        ContextAssembler::new(
            EntityLogStore::new(storage.clone()),
            SummaryArchive::new(storage.clone()),
            InsightLog::new(storage.clone()),
            PlanHistory::new(storage),
            facts.clone(),
            facts.clone(),
            facts,
            window,
            5,
        )
    }

    #[tokio::test]
    async fn test_unknown_participant_gets_empty_snapshot() {
        let storage: Arc<dyn DocumentStore> = Arc::new(InMemoryStorage::new());
        let snapshot = assembler(storage, 20).assemble("MEM_404").await.unwrap();

        assert_eq!(snapshot.participant_key, "MEM_404");
        assert!(snapshot.is_empty());
        assert!(snapshot.latest_summary.is_none());
        assert!(snapshot.team.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_composes_every_source() {
        let storage: Arc<dyn DocumentStore> = Arc::new(InMemoryStorage::new());
        let facts = StoredFacts::new(storage.clone());
        let log = EntityLogStore::new(storage.clone());
        let archive = SummaryArchive::new(storage.clone());

        facts
            .register_team(&Team::new("TEAM_1", "techora", "Triage app", 24))
            .await
            .unwrap();
        facts
            .register_participant(&Participant::new("MEM_01", "Asha", "TEAM_1"))
            .await
            .unwrap();

        let active = Goal::new("MEM_01", "Ship auth");
        let mut done = Goal::new("MEM_01", "Pick a stack");
        done.status = GoalStatus::Completed;
        facts.put_goal(&active).await.unwrap();
        facts.put_goal(&done).await.unwrap();
        facts.put_goal(&Goal::new("MEM_02", "Not mine")).await.unwrap();

        let mut revoked = Instruction::new("lead", InstructionTarget::All, "Old rule");
        revoked.active = false;
        facts.issue_instruction(&revoked).await.unwrap();
        facts
            .issue_instruction(&Instruction::new("lead", InstructionTarget::All, "Demo at 18:00"))
            .await
            .unwrap();
        facts
            .issue_instruction(&Instruction::new(
                "lead",
                InstructionTarget::Participant("MEM_01".to_string()),
                "Pair with Ravi",
            ))
            .await
            .unwrap();
        facts
            .issue_instruction(&Instruction::new(
                "lead",
                InstructionTarget::Participant("MEM_02".to_string()),
                "Someone else's task",
            ))
            .await
            .unwrap();

        let now = Utc::now();
        for i in 0..3 {
            log.append(
                "MEM_01",
                &[Turn::user(format!("q{}", i), now), Turn::assistant(format!("a{}", i), now)],
            )
            .await
            .unwrap();
        }
        archive
            .append(&SummaryDigest::new("MEM_01", "older digest", 10))
            .await
            .unwrap();
        archive
            .append(&SummaryDigest::new("MEM_01", "newest digest", 10))
            .await
            .unwrap();

        let snapshot = assembler(storage, 4).assemble("MEM_01").await.unwrap();

        assert_eq!(snapshot.recent_turns.len(), 4);
        assert_eq!(snapshot.recent_turns[0].text, "q1");
        assert_eq!(snapshot.latest_summary.as_deref(), Some("newest digest"));
        assert_eq!(
            snapshot.active_goals.into_iter().collect::<Vec<_>>(),
            vec!["Ship auth".to_string()]
        );
        assert_eq!(
            snapshot.applicable_instructions.into_iter().collect::<Vec<_>>(),
            vec!["Demo at 18:00".to_string(), "Pair with Ravi".to_string()]
        );
        assert!(snapshot.latest_plan_summary.is_none());
        assert_eq!(snapshot.participant.unwrap().name, "Asha");
        assert_eq!(snapshot.team.unwrap().name, "techora");
    }

    #[tokio::test]
    async fn test_latest_plan_summary_is_shared() {
        let storage: Arc<dyn DocumentStore> = Arc::new(InMemoryStorage::new());
        let plans = PlanHistory::new(storage.clone());
        plans
            .save("MEM_01", "Phase 1: Setup", "Old plan.")
            .await
            .unwrap();
        plans
            .save("MEM_01", "Phase 2: MVP", "Build the triage queue next.")
            .await
            .unwrap();

        let snapshot = assembler(storage, 20).assemble("MEM_02").await.unwrap();
        assert_eq!(
            snapshot.latest_plan_summary.as_deref(),
            Some("Build the triage queue next.")
        );
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_assembly_does_not_mutate_sources() {
        let storage: Arc<dyn DocumentStore> = Arc::new(InMemoryStorage::new());
        let log = EntityLogStore::new(storage.clone());
        let now = Utc::now();
        log.append("MEM_01", &[Turn::user("q", now), Turn::assistant("a", now)])
            .await
            .unwrap();

        let assembler = assembler(storage, 20);
        for _ in 0..3 {
            assembler.assemble("MEM_01").await.unwrap();
        }
        assert_eq!(log.length("MEM_01").await.unwrap(), 2);
    }
}
