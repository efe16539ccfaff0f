//! System prompts, extraction schemas and reply markers for coaching agents.

use std::sync::LazyLock;

use regex::Regex;

use crate::routing::AgentKind;

use super::context::AgentContext;

/// Marker an agent appends when it judges the phase finished. Never shown to
/// the user.
pub const PHASE_COMPLETE_MARKER: &str = "[PHASE_COMPLETE]";

static AFFIRMATIVE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    match Regex::new(
        r"(?i)^\W*(yes|yep|yeah|correct|confirm|confirmed|that'?s right|sounds good|looks good|let'?s go|done)\b",
    ) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!("Affirmative pattern failed to compile: {}", e);
            None
        }
    }
});

/// Whether the user's text is an explicit confirmation.
pub fn is_affirmative(text: &str) -> bool {
    AFFIRMATIVE
        .as_ref()
        .is_some_and(|re| re.is_match(text.trim()))
}

/// Fields a phase agent needs before a confirmation can close the phase.
pub fn required_fields(kind: AgentKind) -> &'static [&'static str] {
    match kind {
        AgentKind::Assessment => &["fitness_level", "weekly_frequency"],
        AgentKind::GoalSetting => &["primary_goal"],
        AgentKind::ProgramDesign => &["equipment", "session_minutes"],
        AgentKind::Scheduling => &["training_days"],
        AgentKind::General | AgentKind::Tracker | AgentKind::Diagnostic => &[],
    }
}

/// Build the system prompt for an agent.
pub fn system_prompt(kind: AgentKind, context: &AgentContext) -> String {
    let base = "\
You are Coach, a friendly personal fitness coach.
Guidelines:
- Be concise. 1-3 sentences per response. Ask ONE question at a time.
- Acknowledge what the user shares before asking the next question.
- Never give medical advice; suggest a professional for pain or injury.";

    let instructions = match kind {
        AgentKind::Assessment => format!(
            "\n\nCURRENT STEP: Fitness assessment (phase {phase})
Collect: current fitness level (beginner/intermediate/advanced), how many days per week \
they train now, and any injuries or limitations.

When you have their fitness level and weekly frequency, summarize it back, and end your \
message with {PHASE_COMPLETE_MARKER} on its own line.",
            phase = context.current_phase,
        ),
        AgentKind::GoalSetting => format!(
            "\n\nCURRENT STEP: Goal setting (phase {phase})
The user is {level} and trains {frequency} days per week.
Collect: their primary goal, a measurable target if they have one, and a timeline in weeks.

When the goal is clear, confirm it and end your message with {PHASE_COMPLETE_MARKER}.",
            phase = context.current_phase,
            level = context.prior_text("fitness_level", "at an unknown level"),
            frequency = context.prior_text("weekly_frequency", "an unknown number of"),
        ),
        AgentKind::ProgramDesign => format!(
            "\n\nCURRENT STEP: Program design (phase {phase})
Their goal: {goal}. Limitations: {injuries}.
Collect: available equipment, preferred training style, and session length in minutes.

When you can describe a program outline, present it and end your message with \
{PHASE_COMPLETE_MARKER}.",
            phase = context.current_phase,
            goal = context.prior_text("primary_goal", "general fitness"),
            injuries = context.prior_text("injuries", "none reported"),
        ),
        AgentKind::Scheduling => format!(
            "\n\nCURRENT STEP: Scheduling (phase {phase})
Planned sessions: {minutes} minutes each.
Collect: which days they will train, preferred time of day, and whether they want reminders.

When the schedule is settled, read it back and end your message with \
{PHASE_COMPLETE_MARKER}.",
            phase = context.current_phase,
            minutes = context.prior_text("session_minutes", "about 45"),
        ),
        AgentKind::General | AgentKind::Tracker => "\n\n\
The user has finished onboarding. Answer questions, log workouts they mention, \
adjust their plan when asked, and keep them motivated."
            .to_string(),
        AgentKind::Diagnostic => String::new(),
    };

    let facts = context.known_facts();
    let learned = if facts.is_empty() {
        String::new()
    } else {
        format!("\n\nWhat you know about the user:\n{facts}")
    };

    format!("{base}{instructions}{learned}")
}

/// Build the extraction prompt for a phase agent. Empty for agents without
/// a schema.
pub fn extraction_prompt(kind: AgentKind, conversation_text: &str) -> String {
    let schema = match kind {
        AgentKind::Assessment => {
            r#"Extract the following from the conversation. Use null for anything not mentioned.
{
  "fitness_level": "beginner" | "intermediate" | "advanced" | null,
  "weekly_frequency": integer days per week or null,
  "injuries": "string describing injuries or limitations, or null"
}"#
        }
        AgentKind::GoalSetting => {
            r#"Extract the following from the conversation. Use null for anything not mentioned.
{
  "primary_goal": "string or null (e.g. lose weight, run a 10k, build muscle)",
  "target": "measurable target as a string, or null",
  "timeline_weeks": integer or null
}"#
        }
        AgentKind::ProgramDesign => {
            r#"Extract the following from the conversation. Use null/empty for anything not mentioned.
{
  "equipment": ["array of available equipment, lowercase"],
  "training_style": "string or null (e.g. strength, hiit, running)",
  "session_minutes": integer or null
}"#
        }
        AgentKind::Scheduling => {
            r#"Extract the following from the conversation. Use null/empty for anything not mentioned.
{
  "training_days": ["monday", "wednesday", ...],
  "preferred_time": "morning" | "afternoon" | "evening" | null,
  "reminders": true | false | null
}"#
        }
        AgentKind::General | AgentKind::Tracker | AgentKind::Diagnostic => return String::new(),
    };

    format!(
        "Given this coaching conversation:\n\n\
         {conversation_text}\n\n\
         {schema}\n\n\
         Respond with ONLY valid JSON, no explanation or markdown formatting."
    )
}

/// A model reply with control markers removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    /// Safe to display.
    pub cleaned: String,
    pub phase_completed: bool,
}

pub fn parse_agent_reply(response: &str) -> ParsedReply {
    ParsedReply {
        phase_completed: response.contains(PHASE_COMPLETE_MARKER),
        cleaned: response.replace(PHASE_COMPLETE_MARKER, "").trim().to_string(),
    }
}

/// Pull a JSON object out of an extraction reply, tolerating code fences.
pub fn parse_extraction(
    raw: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, serde_json::Error> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(body)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    fn empty_context(phase: u32) -> AgentContext {
        AgentContext {
            user_id: "u1".into(),
            current_phase: phase,
            is_complete: false,
            prior_data: BTreeMap::new(),
            current_data: None,
            history: Vec::new(),
        }
    }

    #[test]
    fn affirmatives() {
        for text in [
            "yes",
            "Yep!",
            "yeah that works",
            "Correct",
            "confirmed",
            "that's right",
            "thats right",
            "Sounds good to me",
            "looks good",
            "let's go",
            "done",
        ] {
            assert!(is_affirmative(text), "{text} should be affirmative");
        }
        for text in ["no", "yesterday I ran", "not done yet", "maybe", ""] {
            assert!(!is_affirmative(text), "{text} should not be affirmative");
        }
    }

    #[test]
    fn assessment_prompt_mentions_marker() {
        let prompt = system_prompt(AgentKind::Assessment, &empty_context(1));
        assert!(prompt.contains("CURRENT STEP: Fitness assessment"));
        assert!(prompt.contains(PHASE_COMPLETE_MARKER));
        assert!(!prompt.contains("What you know about the user"));
    }

    #[test]
    fn later_prompts_read_prior_data_with_defaults() {
        let mut ctx = empty_context(2);
        ctx.prior_data.insert(
            "phase_1".into(),
            json!({ "fitness_level": "beginner", "weekly_frequency": 3 }),
        );
        let prompt = system_prompt(AgentKind::GoalSetting, &ctx);
        assert!(prompt.contains("The user is beginner and trains 3 days per week"));
        assert!(prompt.contains("- fitness_level: beginner"));

        let prompt = system_prompt(AgentKind::ProgramDesign, &empty_context(3));
        assert!(prompt.contains("Their goal: general fitness"));
        assert!(prompt.contains("Limitations: none reported"));
    }

    #[test]
    fn extraction_prompts() {
        let prompt = extraction_prompt(AgentKind::Assessment, "User: I'm a beginner");
        assert!(prompt.contains("fitness_level"));
        assert!(prompt.contains("User: I'm a beginner"));
        assert!(extraction_prompt(AgentKind::General, "anything").is_empty());
        assert!(extraction_prompt(AgentKind::Diagnostic, "anything").is_empty());
    }

    #[test]
    fn parse_reply_strips_marker() {
        let parsed = parse_agent_reply("Great, got it!\n[PHASE_COMPLETE]");
        assert_eq!(parsed.cleaned, "Great, got it!");
        assert!(parsed.phase_completed);

        let parsed = parse_agent_reply("How often do you train?");
        assert_eq!(parsed.cleaned, "How often do you train?");
        assert!(!parsed.phase_completed);
    }

    #[test]
    fn parse_extraction_handles_fences() {
        let plain = parse_extraction(r#"{"a": 1}"#).unwrap();
        assert_eq!(plain["a"], 1);
        let fenced = parse_extraction("```json\n{\"a\": 2}\n```").unwrap();
        assert_eq!(fenced["a"], 2);
        assert!(parse_extraction("not json").is_err());
        assert!(parse_extraction("[1, 2]").is_err());
    }
}
