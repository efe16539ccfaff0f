//! Agent labels: the closed set of agents a request can be routed to.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Every agent the router knows about.
///
/// Four agents own onboarding phases; `General` serves everything after
/// onboarding; `Tracker` is reserved for post-onboarding and always folds
/// into `General`; `Diagnostic` is exempt from access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum AgentKind {
    Assessment,
    GoalSetting,
    ProgramDesign,
    Scheduling,
    General,
    Tracker,
    Diagnostic,
}

impl AgentKind {
    /// All agents, in phase order first.
    pub const ALL: [AgentKind; 7] = [
        Self::Assessment,
        Self::GoalSetting,
        Self::ProgramDesign,
        Self::Scheduling,
        Self::General,
        Self::Tracker,
        Self::Diagnostic,
    ];

    /// Agents that may own onboarding phases.
    pub const PHASE_AGENTS: [AgentKind; 4] = [
        Self::Assessment,
        Self::GoalSetting,
        Self::ProgramDesign,
        Self::Scheduling,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Assessment => "assessment",
            Self::GoalSetting => "goal_setting",
            Self::ProgramDesign => "program_design",
            Self::Scheduling => "scheduling",
            Self::General => "general",
            Self::Tracker => "tracker",
            Self::Diagnostic => "diagnostic",
        }
    }

    pub fn is_phase_agent(&self) -> bool {
        Self::PHASE_AGENTS.contains(self)
    }

    pub fn is_general(&self) -> bool {
        matches!(self, Self::General)
    }

    /// Agents that only exist after onboarding (excluding `General` itself).
    pub fn is_post_only(&self) -> bool {
        matches!(self, Self::Tracker)
    }

    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Self::Diagnostic)
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Returned when a string is not a known agent label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown agent label: {0}")]
pub struct UnknownAgent(pub String);

impl FromStr for AgentKind {
    type Err = UnknownAgent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.label() == normalized)
            .ok_or_else(|| UnknownAgent(s.to_string()))
    }
}

impl TryFrom<String> for AgentKind {
    type Error = UnknownAgent;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
