use anyhow::Context;
use story_gen_backend::{
    app::create_router, app_config::AppConfig, initialize_app_state,
    services::initialize_background_tasks,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before the filter reads RUST_LOG
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "story_gen_backend=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().context("Invalid configuration")?;
    info!(
        "Starting Story Gen Backend on {} ({})",
        config.server.bind_address, config.environment
    );

    let state = match initialize_app_state(&config).await {
        Ok(state) => {
            info!("Application state initialized successfully");
            state
        },
        Err(e) => {
            error!("Failed to initialize application state: {}", e);
            return Err(anyhow::anyhow!("Startup failed: {}", e));
        },
    };

    if config.features.enable_background_tasks {
        initialize_background_tasks(state.clone()).await;
    }

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;
    info!("HTTP server listening on {}", config.server.bind_address);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
