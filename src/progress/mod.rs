//! Per-user onboarding progress and the conversation log.
//!
//! The store is the only persistent state the router touches. Records are
//! created on first onboarding contact and only ever mutated by the
//! orchestrator.

pub mod libsql_backend;
mod migrations;
pub mod model;
pub mod store;

pub use libsql_backend::LibSqlProgressStore;
pub use model::{ConversationTurn, PhaseAdvance, ProgressRecord, Speaker, phase_key};
pub use store::{MemoryProgressStore, ProgressStore};

use std::path::Path;
use std::sync::Arc;

/// Path value that selects the in-memory store.
pub const MEMORY_PATH: &str = ":memory:";

/// Open the progress store for `path`.
///
/// `:memory:` gives a process-local [`MemoryProgressStore`]; anything else is
/// a libSQL file, created with parent directories and migrated on open.
pub async fn open_store(path: &str) -> crate::error::Result<Arc<dyn ProgressStore>> {
    if path == MEMORY_PATH {
        tracing::info!("Using in-memory progress store");
        return Ok(Arc::new(MemoryProgressStore::new()));
    }
    tracing::info!(path, "Using libSQL progress store");
    let store = LibSqlProgressStore::new_local(Path::new(path)).await?;
    Ok(Arc::new(store))
}
