//! Query classifier: maps free text to an agent label.
//!
//! Classification never fails from the caller's point of view: transport
//! errors, timeouts and unparseable replies all resolve to the mode's
//! fallback label. Successful results are cached under
//! `(mode, normalized prefix)`, but only for low-latency (voice) requests.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::llm::{CallPurpose, ChatMessage, CompletionRequest, LlmProvider};

use super::cache::BoundedCache;
use super::kind::AgentKind;
use super::mode::{ExecutionMode, Mode};

/// Characters of normalized text that participate in the cache key.
pub const CACHE_PREFIX_CHARS: usize = 50;

const CLASSIFY_MAX_TOKENS: u32 = 16;
const CLASSIFY_TEMPERATURE: f32 = 0.0;

/// Cache key: mode plus the normalized text prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassifierKey {
    pub mode: Mode,
    pub prefix: String,
}

impl ClassifierKey {
    pub fn new(mode: Mode, text: &str, prefix_chars: usize) -> Self {
        Self {
            mode,
            prefix: normalize(text, prefix_chars),
        }
    }
}

/// Lowercase, trim, truncate to `prefix_chars` characters.
pub fn normalize(text: &str, prefix_chars: usize) -> String {
    text.trim().to_lowercase().chars().take(prefix_chars).collect()
}

/// Labels the classifier may return in a mode.
pub fn categories(mode: Mode) -> &'static [AgentKind] {
    match mode {
        Mode::Onboarding => &AgentKind::PHASE_AGENTS,
        Mode::Post => &[AgentKind::General, AgentKind::Tracker],
    }
}

/// Label substituted when classification fails or is unrecognized.
pub fn fallback_label(mode: Mode) -> AgentKind {
    match mode {
        Mode::Onboarding => AgentKind::Assessment,
        Mode::Post => AgentKind::General,
    }
}

/// Where a classification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationSource {
    Cache,
    Model,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub label: AgentKind,
    pub source: ClassificationSource,
}

/// Classifier settings.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub timeout: Duration,
    pub prefix_chars: usize,
    pub cache_capacity: usize,
    pub cache_ttl: Option<Duration>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            prefix_chars: CACHE_PREFIX_CHARS,
            cache_capacity: 1024,
            cache_ttl: Some(Duration::from_secs(3600)),
        }
    }
}

pub struct Classifier {
    llm: Arc<dyn LlmProvider>,
    cache: BoundedCache<ClassifierKey, AgentKind>,
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LlmProvider>, config: ClassifierConfig) -> Self {
        Self {
            llm,
            cache: BoundedCache::new(config.cache_capacity, config.cache_ttl),
            config,
        }
    }

    /// Classify `text` for `mode`. Never errors.
    pub async fn classify(
        &self,
        text: &str,
        mode: Mode,
        execution: ExecutionMode,
    ) -> Classification {
        let key = ClassifierKey::new(mode, text, self.config.prefix_chars);

        if let Some(label) = self.cache.get(&key).await {
            debug!(%mode, %label, "Classifier cache hit");
            return Classification {
                label,
                source: ClassificationSource::Cache,
            };
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(classification_prompt(mode)),
            ChatMessage::user(text),
        ])
        .with_purpose(CallPurpose::Classify)
        .with_max_tokens(CLASSIFY_MAX_TOKENS)
        .with_temperature(CLASSIFY_TEMPERATURE);

        let fallback = Classification {
            label: fallback_label(mode),
            source: ClassificationSource::Fallback,
        };

        let raw = match tokio::time::timeout(self.config.timeout, self.llm.complete(request)).await
        {
            Ok(Ok(response)) => response.content,
            Ok(Err(e)) => {
                error!(%mode, error = %e, fallback = %fallback.label, "Classification call failed");
                return fallback;
            }
            Err(_) => {
                error!(
                    %mode,
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    fallback = %fallback.label,
                    "Classification call timed out"
                );
                return fallback;
            }
        };

        let Some(label) = parse_label(&raw, mode) else {
            warn!(%mode, raw = %raw, fallback = %fallback.label, "Unrecognized classification");
            return fallback;
        };

        if execution.is_low_latency() {
            self.cache.insert(key, label).await;
        }

        Classification {
            label,
            source: ClassificationSource::Model,
        }
    }

    /// Entries currently cached.
    pub async fn cached_entries(&self) -> usize {
        self.cache.len().await
    }
}

/// Parse a model reply into one of the mode's categories.
///
/// Accepts the bare label (any case, optional quotes or punctuation), or a
/// reply that mentions exactly one category label.
pub fn parse_label(raw: &str, mode: Mode) -> Option<AgentKind> {
    let allowed = categories(mode);
    let cleaned = raw
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '_');

    if let Ok(kind) = cleaned.parse::<AgentKind>() {
        return allowed.contains(&kind).then_some(kind);
    }

    let lowered = raw.to_lowercase();
    let mut mentioned = allowed.iter().filter(|k| lowered.contains(k.label()));
    match (mentioned.next(), mentioned.next()) {
        (Some(kind), None) => Some(*kind),
        _ => None,
    }
}

fn classification_prompt(mode: Mode) -> String {
    let descriptions: Vec<String> = categories(mode)
        .iter()
        .map(|kind| format!("- {}: {}", kind.label(), describe(*kind)))
        .collect();
    format!(
        "Classify the user's message for a fitness coaching app. \
         Pick exactly one category:\n{}\n\n\
         Respond with ONLY the category name, nothing else.",
        descriptions.join("\n")
    )
}

fn describe(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Assessment => "current fitness level, training history, frequency, injuries",
        AgentKind::GoalSetting => "what they want to achieve, targets, deadlines",
        AgentKind::ProgramDesign => "equipment, training style, session length",
        AgentKind::Scheduling => "which days and times they can train, reminders",
        AgentKind::General => "anything else: questions, advice, motivation",
        AgentKind::Tracker => "logging a workout or reviewing logged progress",
        AgentKind::Diagnostic => "internal diagnostics",
    }
}
