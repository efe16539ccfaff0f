//! Error types for the coach router.

use std::time::Duration;

use crate::routing::{AgentKind, DenialReason};

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Routing error: {0}")]
    Route(#[from] RouteError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid phase map: {0}")]
    PhaseMap(#[from] PhaseMapError),
}

/// Progress store errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Progress for user {user_id} was modified concurrently")]
    Conflict { user_id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("LLM call timed out after {after:?}")]
    Timeout { after: Duration },
}

/// Phase map violations. These are configuration bugs, never expected once
/// the router has started with a valid map.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhaseMapError {
    #[error("phase map has no ranges")]
    Empty,

    #[error("range {start}-{end} for {agent} is inverted or starts at zero")]
    InvalidRange {
        agent: AgentKind,
        start: u32,
        end: u32,
    },

    #[error("phase map must start at phase 1, first range starts at {first}")]
    DoesNotStartAtOne { first: u32 },

    #[error("gap in phase map between phase {after} and phase {next}")]
    Gap { after: u32, next: u32 },

    #[error("phase {phase} is covered by more than one range")]
    Overlap { phase: u32 },

    #[error("{agent} cannot own onboarding phases")]
    NotAPhaseAgent { agent: AgentKind },

    #[error("{agent} appears in more than one range")]
    DuplicateAgent { agent: AgentKind },

    #[error("phase {phase} is outside [1, {max}]")]
    OutOfRange { phase: u32, max: u32 },

    #[error("cannot parse phase map: {0}")]
    Parse(String),

    #[error("record at phase {phase} names {stored}, the map assigns {expected}")]
    AgentMismatch {
        phase: u32,
        stored: AgentKind,
        expected: AgentKind,
    },
}

/// Failure inside an agent's `process` call.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("{agent} failed to generate a reply: {source}")]
    Generation {
        agent: AgentKind,
        #[source]
        source: LlmError,
    },
}

/// Outcome of a routed request that did not produce a reply.
///
/// `AccessDenied` and `NotFound` are expected outcomes callers branch on.
/// `GenerationFailed` carries a user-facing retry message.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Access denied: {reason}")]
    AccessDenied { reason: DenialReason },

    #[error("No progress record for user {user_id}")]
    NotFound { user_id: String },

    #[error("Reply generation failed: {message}")]
    GenerationFailed { message: String },

    #[error("Configuration invariant violated: {0}")]
    Invariant(#[from] PhaseMapError),

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),
}

impl RouteError {
    /// Whether the caller may simply resend the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GenerationFailed { .. } | Self::Store(DatabaseError::Conflict { .. })
        )
    }
}

/// Result type alias for the router.
pub type Result<T> = std::result::Result<T, Error>;
