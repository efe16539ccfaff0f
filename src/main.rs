use std::sync::Arc;

use anyhow::Context;
use coach_router::config::RouterConfig;
use coach_router::llm::{LlmBackend, LlmConfig, create_provider};
use coach_router::orchestrator::Orchestrator;
use coach_router::progress::open_store;
use coach_router::routes::{RouteState, router_routes};
use coach_router::routing::TracingDecisionSink;
use tower_http::cors::CorsLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let backend: LlmBackend = std::env::var("COACH_LLM_BACKEND")
        .unwrap_or_else(|_| "anthropic".to_string())
        .parse()?;

    let model =
        std::env::var("COACH_MODEL").unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string());

    let port: u16 = std::env::var("COACH_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    let config = RouterConfig::from_env().context("invalid COACH_* configuration")?;

    eprintln!("Coach Router v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {} ({:?})", model, backend);
    eprintln!("   Phases: {}", config.phase_map);
    eprintln!("   API: http://0.0.0.0:{}/api/route", port);

    // Create LLM provider
    let llm_config = LlmConfig {
        backend,
        api_key: std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .map(secrecy::SecretString::from),
        model,
    };
    let llm = create_provider(&llm_config).context("failed to create LLM provider")?;

    // ── Progress store ───────────────────────────────────────────────────
    let db_path =
        std::env::var("COACH_DB_PATH").unwrap_or_else(|_| "./data/coach-router.db".to_string());
    eprintln!("   Store: {}", db_path);
    let store = open_store(&db_path)
        .await
        .with_context(|| format!("failed to open progress store at {db_path}"))?;

    let orchestrator = Arc::new(Orchestrator::new(
        config,
        store,
        llm,
        Arc::new(TracingDecisionSink),
    ));

    let app = router_routes(RouteState { orchestrator }).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    tracing::info!(port, "Coach router listening");
    axum::serve(listener, app).await?;

    Ok(())
}
