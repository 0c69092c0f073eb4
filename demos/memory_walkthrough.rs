//! # Memory Walkthrough
//!
//! Runs a planning cycle, then drives one participant through a run of
//! exchanges and shows the live log being compacted into summaries.
//!
//! ## Run This Demo
//!
//! ```bash
//! cargo run --bin memory_walkthrough -- --turns 25
//!
//! # Smaller window, debug logging
//! RUST_LOG=jarvis_core=debug cargo run --bin memory_walkthrough -- --threshold 8 --batch 4
//! ```

use async_trait::async_trait;
use clap::Parser;
use jarvis::prelude::*;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "memory_walkthrough", about = "Record turns and watch compaction")]
struct Args {
    /// Participant key
    #[arg(long, default_value = "MEM_01")]
    participant: String,

    /// Number of exchanges to record
    #[arg(long, default_value_t = 25)]
    turns: usize,

    /// Live length that triggers compaction
    #[arg(long, env = "JARVIS_TRIGGER_THRESHOLD", default_value_t = 20)]
    threshold: usize,

    /// Turns folded into each summary
    #[arg(long, env = "JARVIS_COMPACT_BATCH_SIZE", default_value_t = 10)]
    batch: usize,

    /// Print the final context snapshot as JSON
    #[arg(long)]
    json: bool,
}

/// Offline stand-in for a model: acknowledges the message it was given
struct EchoGenerator;

#[async_trait]
impl TextGenerator for EchoGenerator {
    async fn generate(&self, prompt: &Prompt) -> JarvisResult<String> {
        if prompt.system.starts_with("Extract user status") {
            return Ok("User is working through the walkthrough tasks.".to_string());
        }
        if prompt.system.starts_with("You are a senior tech project manager") {
            return Ok("Phase 1: Setup\n- Schema and auth\nPhase 2: MVP\n- Triage queue".to_string());
        }
        if prompt.system.starts_with("Summarize technical plans") {
            return Ok("Setup first (schema, auth), then the triage queue MVP.".to_string());
        }

        let message = prompt
            .user
            .split("=== NEW MESSAGE ===")
            .nth(1)
            .and_then(|rest| rest.lines().map(str::trim).find(|l| !l.is_empty()))
            .unwrap_or("(nothing)");

        Ok(format!("Noted: {}", message))
    }
}

const TASKS: &[&str] = &[
    "Set up the Postgres schema.",
    "How should we structure the auth routes?",
    "The login form is wired to the API.",
    "We hit a CORS error on the staging build.",
    "Deployed the first preview to staging.",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let storage: Arc<dyn DocumentStore> = Arc::new(InMemoryStorage::new());
    seed_facts(&storage, &args.participant).await?;

    let config = MemoryConfig::new()
        .with_trigger_threshold(args.threshold)
        .with_compact_batch_size(args.batch);

    let memory = MemoryManager::builder(storage)
        .with_config(config)
        .build()?;

    let plan = memory
        .plan_cycle(&args.participant, "Clinic appointment triage", &EchoGenerator)
        .await?;
    info!(plan_id = %plan.id, summary = %plan.summary_text, "Plan saved");

    info!(
        participant = %args.participant,
        turns = args.turns,
        threshold = args.threshold,
        batch = args.batch,
        "=== Memory Walkthrough ==="
    );

    for i in 0..args.turns {
        let message = format!("{} (update {})", TASKS[i % TASKS.len()], i + 1);
        let reply = memory
            .respond(&args.participant, &message, &EchoGenerator)
            .await?;

        match &reply.compaction {
            CompactionStatus::Compacted {
                digest_id,
                remaining,
                ..
            } => info!(exchange = i + 1, %digest_id, remaining, "Summary archived"),
            CompactionStatus::Deferred { reason } => {
                info!(exchange = i + 1, %reason, "Compaction deferred")
            }
            _ => {}
        }
    }

    let snapshot = memory.get_context(&args.participant).await?;
    let digests = memory.archive().count(&args.participant).await?;

    info!(
        live_turns = snapshot.recent_turns.len(),
        digests,
        goals = snapshot.active_goals.len(),
        instructions = snapshot.applicable_instructions.len(),
        insights = snapshot.recent_insights.len(),
        "Final context"
    );

    if let Some(summary) = &snapshot.latest_summary {
        println!("Latest summary:\n  {}\n", summary);
    }

    println!("Recent conversation:");
    for turn in &snapshot.recent_turns {
        println!("  {}: {}", turn.role.label(), turn.text);
    }

    if args.json {
        println!("\n{}", serde_json::to_string_pretty(&snapshot)?);
    }

    Ok(())
}

async fn seed_facts(storage: &Arc<dyn DocumentStore>, participant: &str) -> anyhow::Result<()> {
    let facts = StoredFacts::new(storage.clone());

    facts
        .register_team(&Team::new("TEAM_1", "techora", "Clinic appointment triage", 24))
        .await?;
    facts
        .register_participant(
            &Participant::new(participant, "Asha", "TEAM_1")
                .with_role("Backend")
                .with_skills(vec!["rust".to_string(), "postgres".to_string()]),
        )
        .await?;
    facts.put_goal(&Goal::new(participant, "Ship the login flow")).await?;
    facts
        .issue_instruction(&Instruction::new(
            "organizer",
            InstructionTarget::All,
            "Demos start at 18:00",
        ))
        .await?;

    Ok(())
}
