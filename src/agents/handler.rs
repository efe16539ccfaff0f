//! Coaching agents.
//!
//! `Agent` is a closed set: one variant per behavior, dispatched by match.
//! Each agent keeps its own transcript for the lifetime of the instance and
//! returns collected data to the orchestrator instead of persisting it.

use std::sync::Arc;

use crate::error::AgentError;
use crate::llm::{CallPurpose, ChatMessage, CompletionRequest, LlmProvider, Role};
use crate::progress::Speaker;
use crate::routing::AgentKind;

use super::context::AgentContext;
use super::prompts::{
    extraction_prompt, is_affirmative, parse_agent_reply, parse_extraction, required_fields,
    system_prompt,
};

const REPLY_MAX_TOKENS: u32 = 1024;
const REPLY_TEMPERATURE: f32 = 0.7;
const EXTRACT_MAX_TOKENS: u32 = 1024;

/// Result of one `process` call.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    /// Reply with control markers stripped.
    pub reply: String,
    /// The agent judged its phase finished.
    pub phase_complete: bool,
    /// Data collected for the current phase. `None` when nothing was
    /// extracted this turn.
    pub contributed_data: Option<serde_json::Value>,
}

impl AgentOutcome {
    fn reply_only(reply: String) -> Self {
        Self {
            reply,
            phase_complete: false,
            contributed_data: None,
        }
    }
}

/// Every agent the factory can build.
pub enum Agent {
    Onboarding(PhaseAgent),
    General(GeneralAgent),
    Diagnostic(DiagnosticAgent),
}

impl Agent {
    pub fn kind(&self) -> AgentKind {
        match self {
            Self::Onboarding(agent) => agent.kind,
            Self::General(_) => AgentKind::General,
            Self::Diagnostic(_) => AgentKind::Diagnostic,
        }
    }

    pub async fn process(&mut self, text: &str) -> Result<AgentOutcome, AgentError> {
        match self {
            Self::Onboarding(agent) => agent.process(text).await,
            Self::General(agent) => agent.process(text).await,
            Self::Diagnostic(agent) => Ok(agent.process(text)),
        }
    }
}

// ── Shared conversation plumbing ────────────────────────────────────

/// Transcript seeded from stored history, extended as the instance talks.
#[derive(Debug, Clone, Default)]
struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    fn from_context(context: &AgentContext) -> Self {
        let messages = context
            .history
            .iter()
            .map(|turn| match turn.speaker {
                Speaker::User => ChatMessage::user(&turn.text),
                Speaker::Agent => ChatMessage::assistant(&turn.text),
            })
            .collect();
        Self { messages }
    }

    /// Messages for a reply call: system prompt, transcript, new user text.
    fn request(&self, system: String, text: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.messages.len() + 2);
        messages.push(ChatMessage::system(system));
        messages.extend(self.messages.iter().cloned());
        messages.push(ChatMessage::user(text));
        messages
    }

    fn commit(&mut self, user: &str, reply: &str) {
        self.messages.push(ChatMessage::user(user));
        self.messages.push(ChatMessage::assistant(reply));
    }

    fn as_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::User => "User",
                    Role::Assistant => "Coach",
                    Role::System => "System",
                };
                format!("{}: {}", role, m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

async fn generate(
    llm: &dyn LlmProvider,
    kind: AgentKind,
    messages: Vec<ChatMessage>,
) -> Result<String, AgentError> {
    let request = CompletionRequest::new(messages)
        .with_purpose(CallPurpose::Respond)
        .with_max_tokens(REPLY_MAX_TOKENS)
        .with_temperature(REPLY_TEMPERATURE);
    llm.complete(request)
        .await
        .map(|response| response.content)
        .map_err(|source| AgentError::Generation {
            agent: kind,
            source,
        })
}

// ── Phase agents ────────────────────────────────────────────────────

/// Serves one onboarding phase: asks questions, extracts structured data and
/// decides when the phase is done.
pub struct PhaseAgent {
    kind: AgentKind,
    context: AgentContext,
    llm: Arc<dyn LlmProvider>,
    transcript: Transcript,
    collected: serde_json::Map<String, serde_json::Value>,
}

impl PhaseAgent {
    pub fn new(kind: AgentKind, context: AgentContext, llm: Arc<dyn LlmProvider>) -> Self {
        let collected = match &context.current_data {
            Some(serde_json::Value::Object(fields)) => fields.clone(),
            _ => serde_json::Map::new(),
        };
        Self {
            kind,
            transcript: Transcript::from_context(&context),
            context,
            llm,
            collected,
        }
    }

    /// Every required field has a non-null, non-empty value.
    pub fn required_filled(&self) -> bool {
        required_fields(self.kind).iter().all(|field| {
            match self.collected.get(*field) {
                None | Some(serde_json::Value::Null) => false,
                Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
                Some(serde_json::Value::Array(items)) => !items.is_empty(),
                Some(_) => true,
            }
        })
    }

    async fn process(&mut self, text: &str) -> Result<AgentOutcome, AgentError> {
        let messages = self
            .transcript
            .request(system_prompt(self.kind, &self.context), text);
        let raw = generate(self.llm.as_ref(), self.kind, messages).await?;
        let parsed = parse_agent_reply(&raw);
        self.transcript.commit(text, &parsed.cleaned);

        let confirmed = is_affirmative(text);
        if !parsed.phase_completed && !confirmed {
            return Ok(AgentOutcome::reply_only(parsed.cleaned));
        }

        let extracted = self.extract_and_merge().await;
        let phase_complete = parsed.phase_completed || (confirmed && self.required_filled());

        tracing::debug!(
            user_id = %self.context.user_id,
            agent = %self.kind,
            marker = parsed.phase_completed,
            confirmed,
            phase_complete,
            "Phase agent turn"
        );

        let contributed_data = if extracted || phase_complete {
            Some(serde_json::Value::Object(self.collected.clone()))
        } else {
            None
        };

        Ok(AgentOutcome {
            reply: parsed.cleaned,
            phase_complete,
            contributed_data,
        })
    }

    /// Run the extraction call and merge non-null fields. Returns whether
    /// anything was merged. Failures are logged and tolerated.
    async fn extract_and_merge(&mut self) -> bool {
        let prompt = extraction_prompt(self.kind, &self.transcript.as_text());
        if prompt.is_empty() {
            return false;
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system("You are a data extraction assistant. Output only valid JSON."),
            ChatMessage::user(prompt),
        ])
        .with_purpose(CallPurpose::Extract)
        .with_max_tokens(EXTRACT_MAX_TOKENS)
        .with_temperature(0.0);

        let raw = match self.llm.complete(request).await {
            Ok(response) => response.content,
            Err(e) => {
                tracing::warn!(agent = %self.kind, "Extraction call failed: {}", e);
                return false;
            }
        };

        match parse_extraction(&raw) {
            Ok(fields) => {
                let mut merged = false;
                for (key, value) in fields {
                    if value.is_null() {
                        continue;
                    }
                    self.collected.insert(key, value);
                    merged = true;
                }
                merged
            }
            Err(e) => {
                tracing::warn!(
                    agent = %self.kind,
                    raw = %raw,
                    "Failed to parse extraction JSON: {}",
                    e
                );
                false
            }
        }
    }
}

// ── General agent ───────────────────────────────────────────────────

/// Post-onboarding coach. Sees every phase's data; never completes a phase.
pub struct GeneralAgent {
    context: AgentContext,
    llm: Arc<dyn LlmProvider>,
    transcript: Transcript,
}

impl GeneralAgent {
    pub fn new(context: AgentContext, llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            transcript: Transcript::from_context(&context),
            context,
            llm,
        }
    }

    async fn process(&mut self, text: &str) -> Result<AgentOutcome, AgentError> {
        let messages = self
            .transcript
            .request(system_prompt(AgentKind::General, &self.context), text);
        let raw = generate(self.llm.as_ref(), AgentKind::General, messages).await?;
        let reply = parse_agent_reply(&raw).cleaned;
        self.transcript.commit(text, &reply);
        Ok(AgentOutcome::reply_only(reply))
    }
}

// ── Diagnostic agent ────────────────────────────────────────────────

/// Reports what the router knows about the user. No model calls.
pub struct DiagnosticAgent {
    context: AgentContext,
    turns: usize,
}

impl DiagnosticAgent {
    pub fn new(context: AgentContext) -> Self {
        Self { context, turns: 0 }
    }

    fn process(&mut self, text: &str) -> AgentOutcome {
        self.turns += 1;
        let phases: Vec<&str> = self.context.prior_data.keys().map(String::as_str).collect();
        let reply = format!(
            "diagnostic user={} phase={} complete={} prior_phases=[{}] partial={} history={} turn={} echo={}",
            self.context.user_id,
            self.context.current_phase,
            self.context.is_complete,
            phases.join(","),
            self.context.current_data.is_some(),
            self.context.history.len(),
            self.turns,
            text.trim(),
        );
        AgentOutcome::reply_only(reply)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::llm::{MockLlm, MockReply};
    use crate::progress::ConversationTurn;

    fn context(phase: u32) -> AgentContext {
        AgentContext {
            user_id: "u1".into(),
            current_phase: phase,
            is_complete: false,
            prior_data: BTreeMap::new(),
            current_data: None,
            history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn plain_reply_does_not_extract() {
        let llm = Arc::new(MockLlm::new());
        llm.push_text(CallPurpose::Respond, "How many days a week do you train?").await;
        let mut agent = PhaseAgent::new(AgentKind::Assessment, context(1), llm.clone());

        let outcome = agent.process("I want to get fit").await.unwrap();
        assert_eq!(outcome.reply, "How many days a week do you train?");
        assert!(!outcome.phase_complete);
        assert!(outcome.contributed_data.is_none());
        assert_eq!(llm.call_count(CallPurpose::Extract).await, 0);
    }

    #[tokio::test]
    async fn marker_completes_and_extracts() {
        let llm = Arc::new(MockLlm::new());
        llm.push_text(
            CallPurpose::Respond,
            "Beginner, three days a week. Got it!\n[PHASE_COMPLETE]",
        )
        .await;
        llm.push_text(
            CallPurpose::Extract,
            r#"{"fitness_level": "beginner", "weekly_frequency": 3, "injuries": null}"#,
        )
        .await;
        let mut agent = PhaseAgent::new(AgentKind::Assessment, context(1), llm.clone());

        let outcome = agent
            .process("I'm a beginner and train 3 times a week")
            .await
            .unwrap();
        assert_eq!(outcome.reply, "Beginner, three days a week. Got it!");
        assert!(outcome.phase_complete);
        assert_eq!(
            outcome.contributed_data,
            Some(json!({ "fitness_level": "beginner", "weekly_frequency": 3 }))
        );

        // The extraction call saw the whole exchange.
        let calls = llm.calls().await;
        let extract = calls.iter().find(|c| c.purpose == CallPurpose::Extract).unwrap();
        assert!(extract.messages[1].content.contains("User: I'm a beginner"));
        assert!(extract.messages[1].content.contains("Coach: Beginner, three days a week"));
    }

    #[tokio::test]
    async fn confirmation_completes_only_when_required_fields_filled() {
        let llm = Arc::new(MockLlm::new());
        llm.push_text(CallPurpose::Extract, r#"{"fitness_level": "advanced"}"#).await;
        let mut agent = PhaseAgent::new(AgentKind::Assessment, context(1), llm.clone());

        let first = agent.process("yes").await.unwrap();
        assert!(!first.phase_complete);
        assert_eq!(first.contributed_data, Some(json!({ "fitness_level": "advanced" })));

        llm.push_text(CallPurpose::Extract, r#"{"weekly_frequency": 5}"#).await;
        let second = agent.process("Sounds good").await.unwrap();
        assert!(second.phase_complete);
        assert_eq!(
            second.contributed_data,
            Some(json!({ "fitness_level": "advanced", "weekly_frequency": 5 }))
        );
    }

    #[tokio::test]
    async fn partial_data_from_context_counts_toward_required_fields() {
        let mut ctx = context(2);
        ctx.current_data = Some(json!({ "primary_goal": "run a 10k" }));
        let llm = Arc::new(MockLlm::new());
        let mut agent = PhaseAgent::new(AgentKind::GoalSetting, ctx, llm);
        assert!(agent.required_filled());

        let outcome = agent.process("yep").await.unwrap();
        assert!(outcome.phase_complete);
        assert_eq!(outcome.contributed_data, Some(json!({ "primary_goal": "run a 10k" })));
    }

    #[tokio::test]
    async fn extraction_failure_is_tolerated() {
        let llm = Arc::new(MockLlm::new());
        llm.push_text(CallPurpose::Respond, "All set! [PHASE_COMPLETE]").await;
        llm.push(CallPurpose::Extract, MockReply::Error("overloaded".into())).await;
        let mut agent = PhaseAgent::new(AgentKind::Scheduling, context(4), llm);

        let outcome = agent.process("mondays and thursdays").await.unwrap();
        assert!(outcome.phase_complete);
        assert_eq!(outcome.reply, "All set!");
        assert_eq!(outcome.contributed_data, Some(json!({})));
    }

    #[tokio::test]
    async fn generation_failure_leaves_transcript_untouched() {
        let llm = Arc::new(MockLlm::new());
        llm.push(CallPurpose::Respond, MockReply::Error("down".into())).await;
        let mut agent = Agent::General(GeneralAgent::new(context(4), llm.clone()));

        let err = agent.process("hello").await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Generation {
                agent: AgentKind::General,
                ..
            }
        ));

        agent.process("hello again").await.unwrap();
        let calls = llm.calls().await;
        let last = &calls.last().unwrap().messages;
        // system + the new user message only
        assert_eq!(last.len(), 2);
    }

    #[tokio::test]
    async fn general_agent_strips_markers_and_never_completes() {
        let llm = Arc::new(MockLlm::new());
        llm.push_text(CallPurpose::Respond, "Keep it up! [PHASE_COMPLETE]").await;
        let mut agent = Agent::General(GeneralAgent::new(context(4), llm));

        let outcome = agent.process("yes").await.unwrap();
        assert_eq!(outcome.reply, "Keep it up!");
        assert!(!outcome.phase_complete);
        assert!(outcome.contributed_data.is_none());
    }

    #[tokio::test]
    async fn history_seeds_transcript() {
        let mut ctx = context(1);
        ctx.history = vec![
            ConversationTurn::user("hi"),
            ConversationTurn::agent(AgentKind::Assessment, "Hello! How fit are you?"),
        ];
        let llm = Arc::new(MockLlm::new());
        let mut agent = Agent::Onboarding(PhaseAgent::new(AgentKind::Assessment, ctx, llm.clone()));
        agent.process("pretty fit").await.unwrap();

        let calls = llm.calls().await;
        let messages = &calls[0].messages;
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[3].content, "pretty fit");
    }

    #[tokio::test]
    async fn diagnostic_reports_context_without_model_calls() {
        let mut ctx = context(3);
        ctx.prior_data.insert("phase_1".into(), json!({}));
        ctx.prior_data.insert("phase_2".into(), json!({}));
        let mut agent = Agent::Diagnostic(DiagnosticAgent::new(ctx));

        let outcome = agent.process("ping").await.unwrap();
        assert!(outcome.reply.contains("phase=3"));
        assert!(outcome.reply.contains("prior_phases=[phase_1,phase_2]"));
        assert!(outcome.reply.contains("echo=ping"));
        assert!(!outcome.phase_complete);
        assert_eq!(agent.kind(), AgentKind::Diagnostic);
    }
}
