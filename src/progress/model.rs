//! Progress record and conversation log models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PhaseMapError;
use crate::routing::{AgentKind, PhaseMap};

/// Key under which a phase's contributed data is stored in `phase_data`.
pub fn phase_key(phase: u32) -> String {
    format!("phase_{phase}")
}

/// Per-user onboarding progress.
///
/// While incomplete, `current_phase` is in `[1, N]`. Once the last phase
/// completes, `is_complete` flips, `current_phase` stays at `N` and
/// `current_agent` becomes `General`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub user_id: String,
    pub current_phase: u32,
    pub is_complete: bool,
    /// Data contributed by each completed phase, keyed by `phase_<n>`.
    #[serde(default)]
    pub phase_data: BTreeMap<String, serde_json::Value>,
    /// Denormalized; recomputable from `current_phase`.
    pub current_agent: AgentKind,
    /// Storage version for compare-and-swap. 0 means never saved.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// What `complete_phase` did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseAdvance {
    /// Moved from one phase to the next.
    Advanced { from: u32, to: u32 },
    /// The last phase finished; onboarding is complete.
    Completed { last: u32 },
}

impl ProgressRecord {
    /// Fresh record: phase 1, incomplete, no data.
    pub fn new(user_id: impl Into<String>, map: &PhaseMap) -> Self {
        let now = Utc::now();
        let first_agent = map
            .ranges()
            .first()
            .map(|r| r.agent)
            .unwrap_or(AgentKind::Assessment);
        Self {
            user_id: user_id.into(),
            current_phase: 1,
            is_complete: false,
            phase_data: BTreeMap::new(),
            current_agent: first_agent,
            version: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Check the record against the active phase map: the phase must exist
    /// and the stored agent must be the one the map assigns to it.
    pub fn validate(&self, map: &PhaseMap) -> Result<(), PhaseMapError> {
        map.check_phase(self.current_phase)?;
        let expected = self.expected_agent(map)?;
        if self.current_agent != expected {
            return Err(PhaseMapError::AgentMismatch {
                phase: self.current_phase,
                stored: self.current_agent,
                expected,
            });
        }
        Ok(())
    }

    /// The agent legal for this record's state.
    pub fn expected_agent(&self, map: &PhaseMap) -> Result<AgentKind, PhaseMapError> {
        if self.is_complete {
            Ok(AgentKind::General)
        } else {
            map.phase_to_agent(self.current_phase)
        }
    }

    /// Data contributed by phases before the current one (all phases once
    /// onboarding is complete).
    pub fn prior_phase_data(&self) -> BTreeMap<String, serde_json::Value> {
        self.phase_data
            .iter()
            .filter(|(key, _)| {
                self.is_complete
                    || phase_number(key).is_some_and(|n| n < self.current_phase)
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Partial data already recorded for the current phase, if any.
    pub fn current_phase_data(&self) -> Option<&serde_json::Value> {
        if self.is_complete {
            return None;
        }
        self.phase_data.get(&phase_key(self.current_phase))
    }

    /// Merge a finished phase's data and advance the state machine.
    pub fn complete_phase(
        &mut self,
        map: &PhaseMap,
        contributed: serde_json::Value,
    ) -> Result<PhaseAdvance, PhaseMapError> {
        map.check_phase(self.current_phase)?;
        let from = self.current_phase;

        self.merge_phase_data(from, contributed);

        let now = Utc::now();
        self.updated_at = now;

        if from >= map.phase_count() {
            self.is_complete = true;
            self.current_agent = AgentKind::General;
            self.completed_at = Some(now);
            return Ok(PhaseAdvance::Completed { last: from });
        }

        let to = from + 1;
        self.current_agent = map.phase_to_agent(to)?;
        self.current_phase = to;
        Ok(PhaseAdvance::Advanced { from, to })
    }

    /// Record partial data for the current phase without advancing.
    pub fn record_partial(
        &mut self,
        map: &PhaseMap,
        partial: serde_json::Value,
    ) -> Result<(), PhaseMapError> {
        if self.is_complete {
            return Ok(());
        }
        map.check_phase(self.current_phase)?;
        self.merge_phase_data(self.current_phase, partial);
        self.updated_at = Utc::now();
        Ok(())
    }

    fn merge_phase_data(&mut self, phase: u32, contributed: serde_json::Value) {
        let key = phase_key(phase);
        match (self.phase_data.get_mut(&key), contributed) {
            (Some(serde_json::Value::Object(existing)), serde_json::Value::Object(incoming)) => {
                existing.extend(incoming);
            }
            (_, serde_json::Value::Null) => {}
            (_, incoming) => {
                self.phase_data.insert(key, incoming);
            }
        }
    }
}

fn phase_number(key: &str) -> Option<u32> {
    key.strip_prefix("phase_")?.parse().ok()
}

/// Who said a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Agent,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

/// One entry in a user's conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
            timestamp: Utc::now(),
            agent: None,
            session_id: None,
        }
    }

    pub fn agent(agent: AgentKind, text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Agent,
            text: text.into(),
            timestamp: Utc::now(),
            agent: Some(agent),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}
