//! LLM integration.
//!
//! Supports:
//! - **Anthropic**: via rig-core, bridged by `RigAdapter`
//! - **Offline**: the scripted `MockLlm`, for local runs without a key

pub mod mock;
pub mod provider;
mod rig_adapter;

pub use mock::{MockLlm, MockReply, RecordedCall};
pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::ConfigError;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    Offline,
}

impl std::str::FromStr for LlmBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "offline" | "mock" => Ok(Self::Offline),
            other => Err(ConfigError::InvalidValue {
                key: "COACH_LLM_BACKEND".to_string(),
                message: format!("unknown backend '{other}'"),
            }),
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: Option<secrecy::SecretString>,
    pub model: String,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, ConfigError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_provider(config),
        LlmBackend::Offline => {
            tracing::warn!("Using offline mock LLM, replies are canned");
            Ok(Arc::new(MockLlm::new()))
        }
    }
}

fn create_anthropic_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, ConfigError> {
    use rig::providers::anthropic;

    let api_key = config
        .api_key
        .as_ref()
        .ok_or_else(|| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".to_string()))?;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(api_key.expose_secret()).map_err(|e| {
            ConfigError::InvalidValue {
                key: "ANTHROPIC_API_KEY".to_string(),
                message: format!("Failed to create Anthropic client: {e}"),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model, "anthropic")))
}
