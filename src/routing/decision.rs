//! Routing decisions and the sinks they are emitted to.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::access::DenialReason;
use super::kind::AgentKind;
use super::mode::Mode;

/// How a routed request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Replied,
    Denied,
    NotFound,
    GenerationFailed,
    Failed,
}

/// Time spent in one orchestration step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepLatency {
    pub step: &'static str,
    pub micros: u64,
}

/// Total plus per-step latency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Latency {
    pub total_micros: u64,
    pub steps: Vec<StepLatency>,
}

impl Latency {
    pub fn step(&self, name: &str) -> Option<u64> {
        self.steps.iter().find(|s| s.step == name).map(|s| s.micros)
    }
}

/// Accumulates step timings while a request is routed.
#[derive(Debug)]
pub struct LatencyTracker {
    started: Instant,
    step_started: Instant,
    steps: Vec<StepLatency>,
}

impl LatencyTracker {
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            step_started: now,
            steps: Vec::new(),
        }
    }

    /// Close the current step under `name` and start the next one.
    pub fn mark(&mut self, name: &'static str) {
        let now = Instant::now();
        self.steps.push(StepLatency {
            step: name,
            micros: micros(now - self.step_started),
        });
        self.step_started = now;
    }

    pub fn finish(self) -> Latency {
        Latency {
            total_micros: micros(self.started.elapsed()),
            steps: self.steps,
        }
    }
}

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

/// Immutable record of one routing decision.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub decision_id: Uuid,
    pub user_id: String,
    pub resolved_agent: Option<AgentKind>,
    pub mode: Mode,
    pub classification_used: bool,
    pub latency: Latency,
    pub violation_reason: Option<DenialReason>,
    pub outcome: DecisionOutcome,
    pub phase_advanced: bool,
    pub created_at: DateTime<Utc>,
}

/// Builder filled in as the orchestrator progresses. `finish` produces the
/// write-once decision.
#[derive(Debug)]
pub struct DecisionDraft {
    user_id: String,
    mode: Mode,
    pub resolved_agent: Option<AgentKind>,
    pub classification_used: bool,
    pub violation_reason: Option<DenialReason>,
    pub phase_advanced: bool,
    pub latency: LatencyTracker,
}

impl DecisionDraft {
    pub fn new(user_id: impl Into<String>, mode: Mode) -> Self {
        Self {
            user_id: user_id.into(),
            mode,
            resolved_agent: None,
            classification_used: false,
            violation_reason: None,
            phase_advanced: false,
            latency: LatencyTracker::start(),
        }
    }

    pub fn finish(self, outcome: DecisionOutcome) -> RoutingDecision {
        RoutingDecision {
            decision_id: Uuid::new_v4(),
            user_id: self.user_id,
            resolved_agent: self.resolved_agent,
            mode: self.mode,
            classification_used: self.classification_used,
            latency: self.latency.finish(),
            violation_reason: self.violation_reason,
            outcome,
            phase_advanced: self.phase_advanced,
            created_at: Utc::now(),
        }
    }
}

/// Receives every routing decision. `emit` must not block.
pub trait DecisionSink: Send + Sync {
    fn emit(&self, decision: RoutingDecision);
}

/// Writes each decision as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDecisionSink;

impl DecisionSink for TracingDecisionSink {
    fn emit(&self, decision: RoutingDecision) {
        tracing::info!(
            decision_id = %decision.decision_id,
            user_id = %decision.user_id,
            agent = decision.resolved_agent.map(|a| a.label()).unwrap_or("none"),
            mode = %decision.mode,
            classified = decision.classification_used,
            outcome = ?decision.outcome,
            violation = decision.violation_reason.map(|r| r.as_str()).unwrap_or("none"),
            phase_advanced = decision.phase_advanced,
            latency_us = decision.latency.total_micros,
            "Routing decision"
        );
    }
}

/// Forwards decisions over a bounded channel. Drops when the buffer is full.
#[derive(Debug, Clone)]
pub struct ChannelDecisionSink {
    tx: mpsc::Sender<RoutingDecision>,
}

impl ChannelDecisionSink {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<RoutingDecision>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

impl DecisionSink for ChannelDecisionSink {
    fn emit(&self, decision: RoutingDecision) {
        if let Err(e) = self.tx.try_send(decision) {
            tracing::debug!("Dropped routing decision: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_records_steps_in_order() {
        let mut tracker = LatencyTracker::start();
        tracker.mark("load");
        std::thread::sleep(Duration::from_millis(2));
        tracker.mark("gate");
        let latency = tracker.finish();

        let names: Vec<_> = latency.steps.iter().map(|s| s.step).collect();
        assert_eq!(names, vec!["load", "gate"]);
        assert!(latency.step("gate").unwrap() >= 2_000);
        assert!(latency.total_micros >= latency.steps.iter().map(|s| s.micros).sum::<u64>());
        assert_eq!(latency.step("classify"), None);
    }

    #[test]
    fn draft_finishes_into_decision() {
        let mut draft = DecisionDraft::new("u1", Mode::Post);
        draft.resolved_agent = Some(AgentKind::General);
        draft.classification_used = true;
        let decision = draft.finish(DecisionOutcome::Replied);

        assert_eq!(decision.user_id, "u1");
        assert_eq!(decision.resolved_agent, Some(AgentKind::General));
        assert!(decision.classification_used);
        assert_eq!(decision.outcome, DecisionOutcome::Replied);
        assert!(decision.violation_reason.is_none());
    }

    #[tokio::test]
    async fn channel_sink_delivers_then_drops_when_full() {
        let (sink, mut rx) = ChannelDecisionSink::new(1);
        sink.emit(DecisionDraft::new("a", Mode::Onboarding).finish(DecisionOutcome::Replied));
        sink.emit(DecisionDraft::new("b", Mode::Onboarding).finish(DecisionOutcome::Replied));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.user_id, "a");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn decision_serializes_reason_kebab_case() {
        let mut draft = DecisionDraft::new("u1", Mode::Onboarding);
        draft.violation_reason = Some(DenialReason::AlreadyComplete);
        let json = serde_json::to_value(draft.finish(DecisionOutcome::Denied)).unwrap();
        assert_eq!(json["violation_reason"], "already-complete");
        assert_eq!(json["outcome"], "denied");
        assert_eq!(json["mode"], "onboarding");
    }
}
