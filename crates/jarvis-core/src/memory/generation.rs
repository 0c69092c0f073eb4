//! Text generation seam and prompt rendering
//!
//! The memory core never calls a model directly. Reply generation,
//! summarization, and insight extraction all go through [`TextGenerator`],
//! fed with prompts rendered here from a [`ContextSnapshot`].

use super::context::ContextSnapshot;
use super::conversation::Turn;
use crate::error::JarvisResult;
use async_trait::async_trait;
use std::fmt::Write;

/// A two-part prompt: standing system guidance plus the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// System message
    pub system: String,
    /// User message
    pub user: String,
}

impl Prompt {
    /// Create a prompt
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// External text generation engine
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Produce a completion for `prompt`.
    ///
    /// Implementations report engine failures as
    /// [`crate::error::JarvisError::Upstream`].
    async fn generate(&self, prompt: &Prompt) -> JarvisResult<String>;
}

/// Number of recent turns quoted in a reply prompt
const REPLY_HISTORY_TURNS: usize = 5;

/// Render the prompt for the assistant's next reply
pub fn reply_prompt(snapshot: &ContextSnapshot, user_message: &str) -> Prompt {
    let mut body = String::new();

    let _ = writeln!(body, "=== CURRENT CONTEXT ===");
    match &snapshot.participant {
        Some(p) => {
            let _ = writeln!(body, "User: {} ({})", p.name, p.role);
        }
        None => {
            let _ = writeln!(body, "User: {}", snapshot.participant_key);
        }
    }
    match &snapshot.team {
        Some(team) => {
            let _ = writeln!(body, "Team: {}", team.name);
            let _ = writeln!(body, "Problem Statement: {}", team.problem_statement);
            let _ = writeln!(body, "Deadline Duration: {}h", team.duration_hours);
        }
        None => {
            let _ = writeln!(body, "Team: Unknown");
        }
    }

    if !snapshot.active_goals.is_empty() {
        let _ = writeln!(body, "\n=== ACTIVE GOALS ===");
        for goal in &snapshot.active_goals {
            let _ = writeln!(body, "- {}", goal);
        }
    }

    if !snapshot.applicable_instructions.is_empty() {
        let _ = writeln!(body, "\n=== STANDING INSTRUCTIONS ===");
        for instruction in &snapshot.applicable_instructions {
            let _ = writeln!(body, "- {}", instruction);
        }
    }

    if let Some(plan) = &snapshot.latest_plan_summary {
        let _ = writeln!(body, "\n=== CURRENT PROJECT PLAN (SUMMARY) ===");
        let _ = writeln!(body, "{}", plan);
    }

    let _ = writeln!(body, "\n=== EARLIER CONVERSATION (SUMMARY) ===");
    let _ = writeln!(
        body,
        "{}",
        snapshot
            .latest_summary
            .as_deref()
            .unwrap_or("No earlier conversation.")
    );

    let _ = writeln!(body, "\n=== USER BEHAVIOR & WORK HISTORY ===");
    if snapshot.recent_insights.is_empty() {
        let _ = writeln!(body, "No prior behavioral data.");
    } else {
        for insight in &snapshot.recent_insights {
            let _ = writeln!(body, "- {}", insight);
        }
    }

    let _ = writeln!(body, "\n=== RECENT CONVERSATION ===");
    let start = snapshot
        .recent_turns
        .len()
        .saturating_sub(REPLY_HISTORY_TURNS);
    body.push_str(&transcript(&snapshot.recent_turns[start..]));

    let _ = writeln!(body, "\n=== NEW MESSAGE ===");
    let _ = writeln!(body, "USER: {}", user_message);

    let _ = writeln!(body, "\n=== INSTRUCTIONS ===");
    let _ = writeln!(body, "1. Respond naturally and helpfully.");
    let _ = writeln!(
        body,
        "2. Use the behavior and summary context to be specific about their work."
    );
    let _ = writeln!(body, "3. Keep it concise (max 70 words).");
    let _ = writeln!(body, "4. Be motivating but technical.");

    Prompt::new(
        "You are Jarvis, an AI hackathon coordinator. Be helpful, concise, and context-aware.",
        body,
    )
}

/// Render the prompt that condenses a batch of old turns into a digest
pub fn summary_prompt(turns: &[Turn], previous_summary: Option<&str>) -> Prompt {
    let mut body = String::from(
        "Summarize this conversation excerpt in 2-3 sentences, focusing on what the \
         participant is building, decisions made, and open problems.\n",
    );

    if let Some(previous) = previous_summary {
        let _ = writeln!(body, "\n=== EARLIER SUMMARY ===\n{}", previous);
    }

    let _ = writeln!(body, "\n=== EXCERPT ===");
    body.push_str(&transcript(turns));
    let _ = writeln!(body, "\nOUTPUT ONLY THE SUMMARY. NO MARKDOWN.");

    Prompt::new("Summarize conversations concisely and factually.", body)
}

/// Render the prompt that extracts a one-sentence behavioral insight
pub fn insight_prompt(snapshot: &ContextSnapshot, user_message: &str, reply: &str) -> Prompt {
    let mut body = String::from(
        "Analyze this interaction and state the participant's current status or work \
         in ONE short sentence.\n",
    );

    let _ = writeln!(body, "\n=== INTERACTION ===");
    let _ = writeln!(body, "USER: {}", user_message);
    let _ = writeln!(body, "AI: {}", reply);

    let _ = writeln!(body, "\n=== CONTEXT ===");
    if let Some(p) = &snapshot.participant {
        let _ = writeln!(body, "Role: {}", p.role);
    }
    if let Some(team) = &snapshot.team {
        let _ = writeln!(body, "Problem: {}", team.problem_statement);
    }

    let _ = writeln!(body, "\nExamples:");
    let _ = writeln!(body, "- User is implementing the login schema.");
    let _ = writeln!(body, "- User is stuck on a CORS error.");
    let _ = writeln!(body, "\nOUTPUT ONLY THE SENTENCE. NO MARKDOWN.");

    Prompt::new("Extract user status. Be brief.", body)
}

/// Characters of a plan quoted in the plan summary prompt
const PLAN_EXCERPT_CHARS: usize = 4000;

/// Render the prompt for a step-by-step project plan, building on the
/// summary of the previous plan when there is one
pub fn plan_prompt(problem_statement: &str, previous_plan_summary: Option<&str>) -> Prompt {
    let mut body = String::from(
        "Create a solid, detailed step-by-step plan to solve this problem.\n",
    );

    let _ = writeln!(body, "\n=== PROBLEM ===\n{}", problem_statement);
    if let Some(previous) = previous_plan_summary {
        let _ = writeln!(body, "\n=== PREVIOUS PLAN CONTEXT ===\n{}", previous);
    }

    let _ = writeln!(body, "\n=== OUTPUT FORMAT ===");
    let _ = writeln!(body, "1. **Phase 1: Setup**\n   - Step 1.1: ...");
    let _ = writeln!(body, "2. **Phase 2: MVP**\n   - ...");
    let _ = writeln!(body, "\nMake it technical, actionable, and robust.");

    Prompt::new("You are a senior tech project manager.", body)
}

/// Render the prompt that condenses a plan into the context for the next one
pub fn plan_summary_prompt(plan_text: &str) -> Prompt {
    let excerpt: String = plan_text.chars().take(PLAN_EXCERPT_CHARS).collect();

    let mut body = String::from(
        "Summarize this project plan into a high-level context block for future \
         reference. Focus on the key objectives and current phase.\n",
    );
    let _ = writeln!(body, "\n=== PLAN ===\n{}", excerpt);
    let _ = writeln!(body, "\n=== OUTPUT ===\nConcise summary (max 100 words).");

    Prompt::new("Summarize technical plans concisely.", body)
}

/// `ROLE: text` lines for a run of turns
pub fn transcript(turns: &[Turn]) -> String {
    let mut out = String::new();
    for turn in turns {
        let _ = writeln!(out, "{}: {}", turn.role.label(), turn.text);
    }
    out
}
