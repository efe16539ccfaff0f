//! Request modes.

use serde::{Deserialize, Serialize};

/// Which set of access rules applies to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Onboarding,
    Post,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onboarding => write!(f, "onboarding"),
            Self::Post => write!(f, "post"),
        }
    }
}

/// How the request reached us. Voice is the low-latency path and is the only
/// mode in which classifier results are cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Text,
    Voice,
}

impl ExecutionMode {
    pub fn is_low_latency(&self) -> bool {
        matches!(self, Self::Voice)
    }
}
