//! Coaching agents: phase agents for onboarding, the general coach and the
//! diagnostic agent, plus the factory that builds and pools them.

pub mod context;
pub mod factory;
pub mod handler;
pub mod prompts;

pub use context::AgentContext;
pub use factory::{AgentFactory, AgentHandle, PoolConfig};
pub use handler::{Agent, AgentOutcome, DiagnosticAgent, GeneralAgent, PhaseAgent};
