//! Orchestrator: composes the gate, classifier, phase map, agent factory
//! and progress store for each request.
//!
//! Per request, under the user's exclusive lock:
//! 1. Load (or create) progress.
//! 2. Run the access gate; denials return before any agent runs.
//! 3. Classify when no label survived the gate.
//! 4. Cross-check onboarding labels against the phase map.
//! 5. Acquire an agent and run `process` under the generation timeout.
//! 6. Merge contributed data, advance, CAS-save, append the turn log.
//! 7. Emit a `RoutingDecision`, whatever the outcome.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::agents::{AgentContext, AgentFactory, AgentOutcome};
use crate::config::RouterConfig;
use crate::error::{PhaseMapError, RouteError};
use crate::llm::LlmProvider;
use crate::progress::{ConversationTurn, PhaseAdvance, ProgressRecord, ProgressStore};
use crate::routing::{
    AccessDecision, AccessGate, AgentKind, Classifier, DecisionDraft, DecisionOutcome,
    DecisionSink, ExecutionMode, Mode,
};

/// Shown to the user when an agent fails to reply.
pub const RETRY_MESSAGE: &str =
    "Sorry, I couldn't put a reply together just now. Please try again in a moment.";

/// Lock-table size above which idle entries are pruned.
const LOCK_PRUNE_THRESHOLD: usize = 1024;

/// An inbound message to route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRequest {
    pub user_id: String,
    pub text: String,
    /// Explicitly requested agent; the classifier picks when absent.
    #[serde(default)]
    pub agent: Option<AgentKind>,
    pub mode: Mode,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl RouteRequest {
    pub fn new(user_id: impl Into<String>, text: impl Into<String>, mode: Mode) -> Self {
        Self {
            user_id: user_id.into(),
            text: text.into(),
            agent: None,
            mode,
            execution_mode: ExecutionMode::Text,
            session_id: None,
        }
    }

    pub fn with_agent(mut self, agent: AgentKind) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_execution_mode(mut self, execution_mode: ExecutionMode) -> Self {
        self.execution_mode = execution_mode;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// A routed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    pub reply_text: String,
    pub resolved_agent: AgentKind,
    pub phase_advanced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_phase: Option<u32>,
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

// ── Per-user locks ──────────────────────────────────────────────────

/// One async mutex per user. Entries nobody holds are pruned lazily.
#[derive(Default)]
struct UserLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() > LOCK_PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(locks.entry(user_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

// ── Orchestrator ────────────────────────────────────────────────────

pub struct Orchestrator {
    config: RouterConfig,
    gate: AccessGate,
    classifier: Classifier,
    factory: AgentFactory,
    store: Arc<dyn ProgressStore>,
    sink: Arc<dyn DecisionSink>,
    locks: UserLocks,
}

impl Orchestrator {
    pub fn new(
        config: RouterConfig,
        store: Arc<dyn ProgressStore>,
        llm: Arc<dyn LlmProvider>,
        sink: Arc<dyn DecisionSink>,
    ) -> Self {
        let factory = match config.pool() {
            Some(pool) => AgentFactory::with_pool(Arc::clone(&llm), pool),
            None => AgentFactory::new(Arc::clone(&llm)),
        };
        Self {
            gate: AccessGate::new(config.phase_map.clone()),
            classifier: Classifier::new(llm, config.classifier()),
            factory,
            store,
            sink,
            locks: UserLocks::default(),
            config,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Route one request and emit its decision.
    pub async fn handle(&self, request: RouteRequest) -> Result<RouteResponse, RouteError> {
        let mut draft = DecisionDraft::new(&request.user_id, request.mode);
        let result = self.route(&request, &mut draft).await;

        let outcome = match &result {
            Ok(_) => DecisionOutcome::Replied,
            Err(RouteError::AccessDenied { .. }) => DecisionOutcome::Denied,
            Err(RouteError::NotFound { .. }) => DecisionOutcome::NotFound,
            Err(RouteError::GenerationFailed { .. }) => DecisionOutcome::GenerationFailed,
            Err(RouteError::Invariant(_) | RouteError::Store(_)) => DecisionOutcome::Failed,
        };
        self.sink.emit(draft.finish(outcome));
        result
    }

    /// Create the user's progress record if it does not exist yet.
    pub async fn start_onboarding(&self, user_id: &str) -> Result<ProgressRecord, RouteError> {
        let _guard = self.locks.acquire(user_id).await;
        match self.store.load(user_id).await? {
            Some(record) => Ok(record),
            None => self.create_progress(user_id).await,
        }
    }

    /// Current progress snapshot.
    pub async fn status(&self, user_id: &str) -> Result<ProgressRecord, RouteError> {
        self.store
            .load(user_id)
            .await?
            .ok_or_else(|| RouteError::NotFound {
                user_id: user_id.to_string(),
            })
    }

    async fn route(
        &self,
        request: &RouteRequest,
        draft: &mut DecisionDraft,
    ) -> Result<RouteResponse, RouteError> {
        let user_id = request.user_id.as_str();
        let map = &self.config.phase_map;

        let _guard = self.locks.acquire(user_id).await;
        draft.latency.mark("lock");

        let mut record = self.load_progress(user_id, request.mode).await?;
        record
            .validate(map)
            .map_err(|e| self.invariant(user_id, e))?;
        draft.latency.mark("load");

        let decision = self
            .gate
            .decide(&record, request.agent, request.mode)
            .map_err(|e| self.invariant(user_id, e))?;
        let gated = match decision {
            AccessDecision::Denied(reason) => {
                tracing::warn!(
                    user_id,
                    requested = request.agent.map(|a| a.label()).unwrap_or("none"),
                    phase = record.current_phase,
                    mode = %request.mode,
                    %reason,
                    "Access denied"
                );
                draft.violation_reason = Some(reason);
                return Err(RouteError::AccessDenied { reason });
            }
            AccessDecision::Allowed {
                agent,
                redirected_from,
            } => {
                if let (Some(from), Some(to)) = (redirected_from, agent) {
                    tracing::info!(
                        user_id,
                        from = %from,
                        to = %to,
                        mode = %request.mode,
                        "Redirected agent request"
                    );
                }
                agent
            }
        };
        draft.latency.mark("gate");

        let label = match gated {
            Some(label) => label,
            None => {
                let classification = self
                    .classifier
                    .classify(&request.text, request.mode, request.execution_mode)
                    .await;
                draft.classification_used = true;
                draft.latency.mark("classify");
                match request.mode {
                    Mode::Onboarding => classification.label,
                    Mode::Post => AccessGate::resolve_post(classification.label),
                }
            }
        };

        let label = self.cross_check(&record, label, request.mode)?;
        draft.resolved_agent = Some(label);
        draft.latency.mark("resolve");

        let handle = self
            .factory
            .acquire(user_id, label, || self.build_context(&record))
            .await;
        draft.latency.mark("agent");

        let outcome = {
            let mut agent = handle.lock().await;
            tokio::time::timeout(self.config.generation_timeout, agent.process(&request.text)).await
        };
        let outcome = match outcome {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!(user_id, agent = %label, error = %e, "Agent failed to reply");
                self.factory.evict(user_id, label).await;
                return Err(RouteError::GenerationFailed {
                    message: RETRY_MESSAGE.to_string(),
                });
            }
            Err(_) => {
                tracing::warn!(
                    user_id,
                    agent = %label,
                    timeout_ms = self.config.generation_timeout.as_millis() as u64,
                    "Agent reply timed out"
                );
                self.factory.evict(user_id, label).await;
                return Err(RouteError::GenerationFailed {
                    message: RETRY_MESSAGE.to_string(),
                });
            }
        };
        draft.latency.mark("generate");

        let advanced = if request.mode == Mode::Onboarding && label.is_phase_agent() {
            self.apply_outcome(&mut record, label, &outcome).await?
        } else {
            None
        };
        let phase_advanced = advanced.is_some();
        draft.phase_advanced = phase_advanced;
        draft.latency.mark("persist");

        let turns = [
            ConversationTurn::user(&request.text).with_session(request.session_id.clone()),
            ConversationTurn::agent(label, &outcome.reply).with_session(request.session_id.clone()),
        ];
        if let Err(e) = self.store.append_turns(user_id, &turns).await {
            tracing::warn!(user_id, "Failed to append conversation turns: {}", e);
        }
        draft.latency.mark("turns");

        Ok(RouteResponse {
            reply_text: outcome.reply,
            resolved_agent: label,
            phase_advanced,
            new_phase: advanced.flatten(),
            is_complete: record.is_complete,
            session_id: request.session_id.clone(),
        })
    }

    async fn load_progress(&self, user_id: &str, mode: Mode) -> Result<ProgressRecord, RouteError> {
        if let Some(record) = self.store.load(user_id).await? {
            return Ok(record);
        }
        if mode == Mode::Onboarding && self.config.auto_create_progress {
            return self.create_progress(user_id).await;
        }
        tracing::info!(user_id, mode = %mode, "No progress record");
        Err(RouteError::NotFound {
            user_id: user_id.to_string(),
        })
    }

    async fn create_progress(&self, user_id: &str) -> Result<ProgressRecord, RouteError> {
        let mut record = ProgressRecord::new(user_id, &self.config.phase_map);
        record.version = self.store.save(user_id, &record).await?;
        tracing::info!(user_id, agent = %record.current_agent, "Started onboarding");
        Ok(record)
    }

    /// Onboarding labels must match the phase owner; the phase map wins.
    fn cross_check(
        &self,
        record: &ProgressRecord,
        label: AgentKind,
        mode: Mode,
    ) -> Result<AgentKind, RouteError> {
        if mode == Mode::Post || label.is_diagnostic() {
            return Ok(label);
        }
        let expected = self
            .config
            .phase_map
            .phase_to_agent(record.current_phase)
            .map_err(|e| self.invariant(&record.user_id, e))?;
        if label != expected {
            tracing::info!(
                user_id = %record.user_id,
                phase = record.current_phase,
                classified = %label,
                expected = %expected,
                "Label disagrees with phase map, using phase owner"
            );
        }
        Ok(expected)
    }

    async fn build_context(&self, record: &ProgressRecord) -> AgentContext {
        let history = match self
            .store
            .recent_turns(&record.user_id, self.config.history_limit)
            .await
        {
            Ok(turns) => turns,
            Err(e) => {
                tracing::warn!(user_id = %record.user_id, "Failed to load history: {}", e);
                Vec::new()
            }
        };
        AgentContext::from_progress(record, history)
    }

    /// Merge the agent's data and advance when the phase is done. Returns
    /// `Some(new_phase)` when the phase advanced (`Some(None)` when
    /// onboarding completed), `None` otherwise.
    async fn apply_outcome(
        &self,
        record: &mut ProgressRecord,
        label: AgentKind,
        outcome: &AgentOutcome,
    ) -> Result<Option<Option<u32>>, RouteError> {
        let map = &self.config.phase_map;
        let user_id = record.user_id.clone();

        let advanced = if outcome.phase_complete {
            let data = outcome
                .contributed_data
                .clone()
                .unwrap_or_else(|| serde_json::json!({}));
            let advance = record
                .complete_phase(map, data)
                .map_err(|e| self.invariant(&user_id, e))?;
            match advance {
                PhaseAdvance::Advanced { from, to } => {
                    tracing::info!(user_id = %user_id, agent = %label, from, to, "Phase complete");
                    Some(Some(to))
                }
                PhaseAdvance::Completed { last } => {
                    tracing::info!(
                        user_id = %user_id,
                        agent = %label,
                        phase = last,
                        "Onboarding complete"
                    );
                    Some(None)
                }
            }
        } else if let Some(data) = outcome.contributed_data.clone() {
            record
                .record_partial(map, data)
                .map_err(|e| self.invariant(&user_id, e))?;
            None
        } else {
            return Ok(None);
        };

        match self.store.save(&user_id, record).await {
            Ok(version) => record.version = version,
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    agent = %label,
                    "Failed to save progress: {}",
                    e
                );
                self.factory.evict(&user_id, label).await;
                return Err(e.into());
            }
        }

        if advanced.is_some() {
            self.factory.evict_user(&user_id).await;
        }
        Ok(advanced)
    }

    fn invariant(&self, user_id: &str, err: PhaseMapError) -> RouteError {
        tracing::error!(
            severity = "critical",
            user_id,
            phase_map = %self.config.phase_map,
            error = %err,
            "Configuration invariant violated"
        );
        RouteError::Invariant(err)
    }
}
