//! Access control gate.
//!
//! A pure decision over `(progress, requested agent, mode)`. The gate never
//! touches the store or the model; the orchestrator logs its denials.

use serde::{Deserialize, Serialize};

use crate::error::PhaseMapError;
use crate::progress::ProgressRecord;

use super::kind::AgentKind;
use super::mode::Mode;
use super::phase_map::PhaseMap;

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenialReason {
    /// Onboarding request from a user who already finished onboarding.
    AlreadyComplete,
    /// The general agent was requested during onboarding.
    GeneralAgentForbidden,
    /// A post-onboarding-only agent was requested during onboarding.
    PostOnlyAgentForbidden,
    /// Post-onboarding request from a user still onboarding.
    Incomplete,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyComplete => "already-complete",
            Self::GeneralAgentForbidden => "general-agent-forbidden",
            Self::PostOnlyAgentForbidden => "post-only-agent-forbidden",
            Self::Incomplete => "incomplete",
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// `agent` is `None` when nothing was requested and the classifier
    /// must pick. `redirected_from` records an overridden request.
    Allowed {
        agent: Option<AgentKind>,
        redirected_from: Option<AgentKind>,
    },
    Denied(DenialReason),
}

impl AccessDecision {
    fn allow(agent: Option<AgentKind>) -> Self {
        Self::Allowed {
            agent,
            redirected_from: None,
        }
    }

    fn redirect(from: AgentKind, to: AgentKind) -> Self {
        Self::Allowed {
            agent: Some(to),
            redirected_from: Some(from),
        }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied(_))
    }
}

/// Access control over the active phase map.
#[derive(Debug, Clone)]
pub struct AccessGate {
    map: PhaseMap,
}

impl AccessGate {
    pub fn new(map: PhaseMap) -> Self {
        Self { map }
    }

    /// Decide whether `requested` may serve this request.
    ///
    /// Fails only when the record's phase lies outside the map, which is a
    /// configuration invariant violation.
    pub fn decide(
        &self,
        progress: &ProgressRecord,
        requested: Option<AgentKind>,
        mode: Mode,
    ) -> Result<AccessDecision, PhaseMapError> {
        if requested.is_some_and(|kind| kind.is_diagnostic()) {
            return Ok(AccessDecision::allow(requested));
        }

        match mode {
            Mode::Onboarding => self.decide_onboarding(progress, requested),
            Mode::Post => Ok(Self::decide_post(progress, requested)),
        }
    }

    fn decide_onboarding(
        &self,
        progress: &ProgressRecord,
        requested: Option<AgentKind>,
    ) -> Result<AccessDecision, PhaseMapError> {
        if progress.is_complete {
            return Ok(AccessDecision::Denied(DenialReason::AlreadyComplete));
        }
        let Some(kind) = requested else {
            return Ok(AccessDecision::allow(None));
        };
        if kind.is_general() {
            return Ok(AccessDecision::Denied(DenialReason::GeneralAgentForbidden));
        }
        if kind.is_post_only() {
            return Ok(AccessDecision::Denied(DenialReason::PostOnlyAgentForbidden));
        }

        let owner = self.map.phase_to_agent(progress.current_phase)?;
        if kind == owner {
            Ok(AccessDecision::allow(Some(kind)))
        } else {
            Ok(AccessDecision::redirect(kind, owner))
        }
    }

    fn decide_post(progress: &ProgressRecord, requested: Option<AgentKind>) -> AccessDecision {
        if !progress.is_complete {
            return AccessDecision::Denied(DenialReason::Incomplete);
        }
        match requested {
            None => AccessDecision::allow(None),
            Some(kind) => match Self::resolve_post(kind) {
                resolved if resolved == kind => AccessDecision::allow(Some(kind)),
                resolved => AccessDecision::redirect(kind, resolved),
            },
        }
    }

    /// Post-onboarding label resolution: everything except the diagnostic
    /// agent folds into `General`.
    pub fn resolve_post(label: AgentKind) -> AgentKind {
        match label {
            AgentKind::Diagnostic => AgentKind::Diagnostic,
            _ => AgentKind::General,
        }
    }
}
