use std::sync::Arc;

use climate_onboarding::config::ServiceConfig;
use climate_onboarding::llm::create_provider;
use climate_onboarding::onboarding::{
    OnboardingOrchestrator, OnboardingRouteState, OnboardingService, onboarding_routes,
};
use climate_onboarding::store::{Database, LibSqlBackend, seed_module_catalog};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env();

    eprintln!("🌍 Climate Onboarding v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   API: http://0.0.0.0:{}/api/cities", config.http_port);

    // ── Completion service ──────────────────────────────────────────────
    let llm = create_provider(&config.llm)?;

    // ── Database ────────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&config.db_path);
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(db_path).await?);
    eprintln!("   Database: {}", config.db_path);

    if !config.skip_module_seed {
        seed_module_catalog(db.as_ref()).await?;
    }

    // ── Onboarding ──────────────────────────────────────────────────────
    let orchestrator = OnboardingOrchestrator::new(db.clone(), llm, config.generation.clone());
    let service = OnboardingService::new(db.clone(), orchestrator);

    // Startup recovery: runs cut off by the last shutdown never finish.
    let recovered = service.recover_interrupted_runs().await?;
    if recovered > 0 {
        eprintln!("   Marked {recovered} interrupted onboarding runs as failed");
    }

    let app = onboarding_routes(OnboardingRouteState {
        db: db.clone(),
        service,
    })
    .layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    tracing::info!(port = config.http_port, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
