//! Agent construction and the optional per-user instance pool.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::llm::LlmProvider;
use crate::routing::{AgentKind, BoundedCache};

use super::context::AgentContext;
use super::handler::{Agent, DiagnosticAgent, GeneralAgent, PhaseAgent};

/// Shared handle to a (possibly pooled) agent instance.
pub type AgentHandle = Arc<Mutex<Agent>>;

type PoolKey = (String, AgentKind);

/// Pool bounds.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub capacity: usize,
    pub ttl: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 512,
            ttl: Some(Duration::from_secs(1800)),
        }
    }
}

pub struct AgentFactory {
    llm: Arc<dyn LlmProvider>,
    pool: Option<BoundedCache<PoolKey, AgentHandle>>,
}

impl AgentFactory {
    /// Factory without pooling: every request gets a fresh instance.
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm, pool: None }
    }

    pub fn with_pool(llm: Arc<dyn LlmProvider>, config: PoolConfig) -> Self {
        Self {
            llm,
            pool: Some(BoundedCache::new(config.capacity, config.ttl)),
        }
    }

    /// Build an agent for `kind`.
    pub fn create(&self, kind: AgentKind, context: AgentContext) -> Agent {
        match kind {
            AgentKind::Assessment
            | AgentKind::GoalSetting
            | AgentKind::ProgramDesign
            | AgentKind::Scheduling => {
                Agent::Onboarding(PhaseAgent::new(kind, context, Arc::clone(&self.llm)))
            }
            // Tracker requests are served by the general coach.
            AgentKind::General | AgentKind::Tracker => {
                Agent::General(GeneralAgent::new(context, Arc::clone(&self.llm)))
            }
            AgentKind::Diagnostic => Agent::Diagnostic(DiagnosticAgent::new(context)),
        }
    }

    /// Pooled instance for `(user, kind)`, or a new one built from the
    /// context `load` produces. `load` only runs on a miss.
    pub async fn acquire<F, Fut>(&self, user_id: &str, kind: AgentKind, load: F) -> AgentHandle
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AgentContext>,
    {
        let Some(pool) = &self.pool else {
            return Arc::new(Mutex::new(self.create(kind, load().await)));
        };

        let key = (user_id.to_string(), kind);
        if let Some(handle) = pool.get(&key).await {
            tracing::debug!(user_id, agent = %kind, "Reusing pooled agent");
            return handle;
        }

        let handle = Arc::new(Mutex::new(self.create(kind, load().await)));
        pool.insert(key, Arc::clone(&handle)).await;
        handle
    }

    /// Drop the pooled instance, so the next request builds a fresh context.
    pub async fn evict(&self, user_id: &str, kind: AgentKind) {
        if let Some(pool) = &self.pool {
            pool.remove(&(user_id.to_string(), kind)).await;
        }
    }

    /// Drop every pooled instance for the user. Used after a hand-off, when
    /// all of their context snapshots are stale.
    pub async fn evict_user(&self, user_id: &str) {
        if let Some(pool) = &self.pool {
            let dropped = pool.remove_where(|(user, _)| user == user_id).await;
            tracing::debug!(user_id, dropped, "Evicted pooled agents");
        }
    }

    pub async fn pooled_instances(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.len().await,
            None => 0,
        }
    }
}
