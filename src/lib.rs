//! Coach Router: phase-gated routing core for a coaching assistant.

pub mod agents;
pub mod config;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod progress;
pub mod routes;
pub mod routing;
