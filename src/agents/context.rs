//! Immutable snapshot handed to an agent at construction.

use std::collections::BTreeMap;

use crate::progress::{ConversationTurn, ProgressRecord};

/// What an agent knows when it is built. Agents never mutate it; collected
/// data goes back to the orchestrator through `AgentOutcome`.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentContext {
    pub user_id: String,
    pub current_phase: u32,
    pub is_complete: bool,
    /// Data from every phase before the current one, keyed `phase_<n>`.
    pub prior_data: BTreeMap<String, serde_json::Value>,
    /// Partial data already recorded for the current phase.
    pub current_data: Option<serde_json::Value>,
    /// Most recent turns, oldest first.
    pub history: Vec<ConversationTurn>,
}

impl AgentContext {
    pub fn from_progress(record: &ProgressRecord, history: Vec<ConversationTurn>) -> Self {
        Self {
            user_id: record.user_id.clone(),
            current_phase: record.current_phase,
            is_complete: record.is_complete,
            prior_data: record.prior_phase_data(),
            current_data: record.current_phase_data().cloned(),
            history,
        }
    }

    /// Latest value of `field` across prior phases, skipping nulls.
    pub fn prior_field(&self, field: &str) -> Option<&serde_json::Value> {
        self.prior_data
            .values()
            .rev()
            .filter_map(|data| data.get(field))
            .find(|v| !v.is_null())
    }

    /// A prior field rendered as text, or `default` when missing.
    pub fn prior_text(&self, field: &str, default: &str) -> String {
        match self.prior_field(field) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
            Some(other) => other.to_string(),
            None => default.to_string(),
        }
    }

    /// Everything learned so far, one `field: value` per line.
    pub fn known_facts(&self) -> String {
        let mut lines = Vec::new();
        for data in self.prior_data.values().chain(self.current_data.iter()) {
            if let serde_json::Value::Object(fields) = data {
                for (key, value) in fields {
                    if value.is_null() {
                        continue;
                    }
                    let rendered = match value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    lines.push(format!("- {key}: {rendered}"));
                }
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::routing::PhaseMap;

    fn context() -> AgentContext {
        let map = PhaseMap::standard();
        let mut record = ProgressRecord::new("u1", &map);
        record
            .complete_phase(&map, json!({ "fitness_level": "beginner", "injuries": null }))
            .unwrap();
        record
            .complete_phase(&map, json!({ "primary_goal": "run a 10k", "target_weeks": 12 }))
            .unwrap();
        record.record_partial(&map, json!({ "equipment": ["dumbbells"] })).unwrap();
        AgentContext::from_progress(&record, Vec::new())
    }

    #[test]
    fn snapshot_splits_prior_and_current() {
        let ctx = context();
        assert_eq!(ctx.current_phase, 3);
        assert_eq!(ctx.prior_data.len(), 2);
        assert_eq!(ctx.current_data, Some(json!({ "equipment": ["dumbbells"] })));
    }

    #[test]
    fn prior_fields_fall_back_to_defaults() {
        let ctx = context();
        assert_eq!(ctx.prior_text("fitness_level", "unknown"), "beginner");
        assert_eq!(ctx.prior_text("target_weeks", "unknown"), "12");
        assert_eq!(ctx.prior_text("injuries", "none reported"), "none reported");
        assert_eq!(ctx.prior_text("sleep", "unknown"), "unknown");
    }

    #[test]
    fn known_facts_skip_nulls() {
        let facts = context().known_facts();
        assert!(facts.contains("- fitness_level: beginner"));
        assert!(facts.contains("- primary_goal: run a 10k"));
        assert!(facts.contains("- equipment: [\"dumbbells\"]"));
        assert!(!facts.contains("injuries"));
    }
}
