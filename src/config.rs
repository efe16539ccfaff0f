//! Router configuration.

use std::time::Duration;

use crate::agents::PoolConfig;
use crate::error::ConfigError;
use crate::routing::{ClassifierConfig, PhaseMap};

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Phase ranges and the agents that own them.
    pub phase_map: PhaseMap,
    /// Upper bound on a classification call.
    pub classifier_timeout: Duration,
    /// Upper bound on an agent's `process` call.
    pub generation_timeout: Duration,
    pub classifier_cache_capacity: usize,
    pub classifier_cache_ttl: Duration,
    /// Reuse agent instances across requests.
    pub agent_pool: bool,
    pub agent_pool_capacity: usize,
    pub agent_pool_ttl: Duration,
    /// Turns of history loaded into a new agent's context.
    pub history_limit: usize,
    /// Create a progress record on a user's first onboarding request.
    pub auto_create_progress: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            phase_map: PhaseMap::standard(),
            classifier_timeout: Duration::from_millis(3000),
            generation_timeout: Duration::from_millis(20_000),
            classifier_cache_capacity: 1024,
            classifier_cache_ttl: Duration::from_secs(3600), // 1 hour
            agent_pool: true,
            agent_pool_capacity: 512,
            agent_pool_ttl: Duration::from_secs(1800), // 30 minutes
            history_limit: 20,
            auto_create_progress: true,
        }
    }
}

impl RouterConfig {
    /// Read `COACH_*` variables, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Set-but-invalid values are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let phase_map = match lookup("COACH_PHASES") {
            Some(text) if !text.trim().is_empty() => PhaseMap::parse(&text)?,
            _ => defaults.phase_map,
        };

        Ok(Self {
            phase_map,
            classifier_timeout: parse_var(&lookup, "COACH_CLASSIFIER_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.classifier_timeout),
            generation_timeout: parse_var(&lookup, "COACH_GENERATION_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.generation_timeout),
            classifier_cache_capacity: parse_var(&lookup, "COACH_CLASSIFIER_CACHE_CAPACITY")?
                .unwrap_or(defaults.classifier_cache_capacity),
            classifier_cache_ttl: parse_var(&lookup, "COACH_CLASSIFIER_CACHE_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.classifier_cache_ttl),
            agent_pool: parse_bool(&lookup, "COACH_AGENT_POOL")?.unwrap_or(defaults.agent_pool),
            agent_pool_capacity: parse_var(&lookup, "COACH_AGENT_POOL_CAPACITY")?
                .unwrap_or(defaults.agent_pool_capacity),
            agent_pool_ttl: parse_var(&lookup, "COACH_AGENT_POOL_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.agent_pool_ttl),
            history_limit: parse_var(&lookup, "COACH_HISTORY_LIMIT")?
                .unwrap_or(defaults.history_limit),
            auto_create_progress: parse_bool(&lookup, "COACH_AUTO_CREATE_PROGRESS")?
                .unwrap_or(defaults.auto_create_progress),
        })
    }

    pub fn classifier(&self) -> ClassifierConfig {
        ClassifierConfig {
            timeout: self.classifier_timeout,
            cache_capacity: self.classifier_cache_capacity,
            cache_ttl: Some(self.classifier_cache_ttl),
            ..Default::default()
        }
    }

    /// `None` when pooling is disabled.
    pub fn pool(&self) -> Option<PoolConfig> {
        self.agent_pool.then_some(PoolConfig {
            capacity: self.agent_pool_capacity,
            ttl: Some(self.agent_pool_ttl),
        })
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}': {e}"),
            }),
    }
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().to_lowercase().as_str() {
        "" => Ok(None),
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}' is not a boolean"),
        }),
    }
}
