//! Auxiliary facts - goals, instructions, participant and team records
//!
//! These collections are owned by other workflows (registration, goal
//! tracking, instruction issuance). Context assembly only reads them through
//! the capability traits [`GoalSource`], [`InstructionSource`] and
//! [`Directory`]. [`StoredFacts`] implements all three over a
//! [`DocumentStore`] and also exposes the writes those workflows perform.

use crate::error::{JarvisError, JarvisResult};
use crate::storage::{DocumentStore, GOALS, INSTRUCTIONS, MEMBERS, TEAMS};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Lifecycle state of a goal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    /// Being worked on
    Active,
    /// Done
    Completed,
}

/// Something a participant is currently working towards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    /// Unique identifier
    pub id: String,

    /// Owner of the goal
    pub participant_key: String,

    /// Goal description
    pub text: String,

    /// Current status
    pub status: GoalStatus,

    /// When work started
    pub started_at: DateTime<Utc>,
}

impl Goal {
    /// Create an active goal
    pub fn new(participant_key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            participant_key: participant_key.into(),
            text: text.into(),
            status: GoalStatus::Active,
            started_at: Utc::now(),
        }
    }
}

/// Audience of an instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "participant_key", rename_all = "snake_case")]
pub enum InstructionTarget {
    /// Every participant
    All,
    /// One participant
    Participant(String),
}

impl InstructionTarget {
    /// Whether the instruction reaches `participant_key`
    pub fn applies_to(&self, participant_key: &str) -> bool {
        match self {
            InstructionTarget::All => true,
            InstructionTarget::Participant(key) => key == participant_key,
        }
    }
}

/// Standing instruction issued by a coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Unique identifier
    pub id: String,

    /// Who issued it
    pub issuer: String,

    /// Who it is addressed to
    pub target: InstructionTarget,

    /// Instruction text
    pub text: String,

    /// Whether it is still in force
    pub active: bool,

    /// Issue time
    pub created_at: DateTime<Utc>,
}

impl Instruction {
    /// Create an active instruction
    pub fn new(issuer: impl Into<String>, target: InstructionTarget, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            issuer: issuer.into(),
            target,
            text: text.into(),
            active: true,
            created_at: Utc::now(),
        }
    }
}

/// Registered participant profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// Opaque participant key
    pub key: String,

    /// Display name
    pub name: String,

    /// Role within the team
    pub role: String,

    /// Owning team
    pub team_id: String,

    /// Declared skills
    #[serde(default)]
    pub skills: Vec<String>,
}

impl Participant {
    /// Create a profile with the default role
    pub fn new(key: impl Into<String>, name: impl Into<String>, team_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            role: "Team Member".to_string(),
            team_id: team_id.into(),
            skills: Vec::new(),
        }
    }

    /// Set the role
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Set skills
    pub fn with_skills(mut self, skills: Vec<String>) -> Self {
        self.skills = skills;
        self
    }
}

/// Team taking part in the event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    /// Team identifier
    pub id: String,

    /// Team name
    pub name: String,

    /// Problem the team is solving
    pub problem_statement: String,

    /// Length of the event in hours
    pub duration_hours: u32,

    /// Event start
    pub started_at: DateTime<Utc>,
}

impl Team {
    /// Create a team starting now
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        problem_statement: impl Into<String>,
        duration_hours: u32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            problem_statement: problem_statement.into(),
            duration_hours,
            started_at: Utc::now(),
        }
    }
}

/// Read access to participant goals
#[async_trait]
pub trait GoalSource: Send + Sync {
    /// Every goal owned by `participant_key`, any status
    async fn goals_for(&self, participant_key: &str) -> JarvisResult<Vec<Goal>>;
}

/// Read access to issued instructions
#[async_trait]
pub trait InstructionSource: Send + Sync {
    /// Instructions that may concern `participant_key`
    async fn instructions_for(&self, participant_key: &str) -> JarvisResult<Vec<Instruction>>;
}

/// Read access to participant and team records
#[async_trait]
pub trait Directory: Send + Sync {
    /// Profile of a participant
    async fn participant(&self, participant_key: &str) -> JarvisResult<Option<Participant>>;

    /// Team record
    async fn team(&self, team_id: &str) -> JarvisResult<Option<Team>>;
}

/// Fact collections kept in a [`DocumentStore`]
#[derive(Clone)]
pub struct StoredFacts {
    storage: Arc<dyn DocumentStore>,
}

impl StoredFacts {
    /// Create a fact store
    pub fn new(storage: Arc<dyn DocumentStore>) -> Self {
        Self { storage }
    }

    /// Register or replace a team
    pub async fn register_team(&self, team: &Team) -> JarvisResult<()> {
        self.put(TEAMS, &team.id, team, "serialize_team").await
    }

    /// Register or replace a participant profile
    pub async fn register_participant(&self, participant: &Participant) -> JarvisResult<()> {
        self.put(MEMBERS, &participant.key, participant, "serialize_participant")
            .await
    }

    /// Store a goal
    pub async fn put_goal(&self, goal: &Goal) -> JarvisResult<()> {
        self.put(GOALS, &goal.id, goal, "serialize_goal").await
    }

    /// Mark a goal completed
    pub async fn complete_goal(&self, goal_id: &str) -> JarvisResult<()> {
        if self.storage.read(GOALS, goal_id).await?.is_none() {
            return Err(JarvisError::not_found("goal", goal_id));
        }

        self.storage
            .set_field(GOALS, goal_id, "status", Value::String("completed".to_string()))
            .await
    }

    /// Store an instruction
    pub async fn issue_instruction(&self, instruction: &Instruction) -> JarvisResult<()> {
        self.put(INSTRUCTIONS, &instruction.id, instruction, "serialize_instruction")
            .await
    }

    /// Withdraw an instruction
    pub async fn revoke_instruction(&self, instruction_id: &str) -> JarvisResult<()> {
        if self.storage.read(INSTRUCTIONS, instruction_id).await?.is_none() {
            return Err(JarvisError::not_found("instruction", instruction_id));
        }

        self.storage
            .set_field(INSTRUCTIONS, instruction_id, "active", Value::Bool(false))
            .await
    }

    async fn put<T: Serialize + Sync>(
        &self,
        collection: &str,
        key: &str,
        record: &T,
        operation: &str,
    ) -> JarvisResult<()> {
        let value =
            serde_json::to_value(record).map_err(|e| JarvisError::serialization(operation, e))?;
        self.storage.write(collection, key, value).await
    }

    async fn get<T: DeserializeOwned>(&self, collection: &str, key: &str) -> JarvisResult<Option<T>> {
        match self.storage.read(collection, key).await? {
            Some(doc) => serde_json::from_value(doc)
                .map(Some)
                .map_err(|e| JarvisError::serialization(format!("deserialize_{}", collection), e)),
            None => Ok(None),
        }
    }

    async fn scan<T: DeserializeOwned>(&self, collection: &str) -> JarvisResult<Vec<T>> {
        // Collections are small and event-scoped; a scan is enough
        self.storage
            .list(collection)
            .await?
            .into_iter()
            .map(|(_, doc)| {
                serde_json::from_value(doc)
                    .map_err(|e| JarvisError::serialization(format!("deserialize_{}", collection), e))
            })
            .collect()
    }
}

#[async_trait]
impl GoalSource for StoredFacts {
    async fn goals_for(&self, participant_key: &str) -> JarvisResult<Vec<Goal>> {
        let mut goals: Vec<Goal> = self
            .scan::<Goal>(GOALS)
            .await?
            .into_iter()
            .filter(|g| g.participant_key == participant_key)
            .collect();
        goals.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(goals)
    }
}

#[async_trait]
impl InstructionSource for StoredFacts {
    async fn instructions_for(&self, participant_key: &str) -> JarvisResult<Vec<Instruction>> {
        let mut instructions: Vec<Instruction> = self
            .scan::<Instruction>(INSTRUCTIONS)
            .await?
            .into_iter()
            .filter(|i| i.target.applies_to(participant_key))
            .collect();
        instructions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(instructions)
    }
}

#[async_trait]
impl Directory for StoredFacts {
    async fn participant(&self, participant_key: &str) -> JarvisResult<Option<Participant>> {
        self.get(MEMBERS, participant_key).await
    }

    async fn team(&self, team_id: &str) -> JarvisResult<Option<Team>> {
        self.get(TEAMS, team_id).await
    }
}
