// Library exports for Story Gen Backend
// This file exposes modules and functions for library consumers

pub mod app;
pub mod app_config;
pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod migrations;
pub mod models;
pub mod schema;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use app::{create_router, AppState};
pub use app_config::{AppConfig, CONFIG};
pub use config::{Plan, PlanCatalog};
pub use db::{DieselDatabaseConfig, DieselPool};
pub use middleware::{auth_middleware, AuthenticatedUser};
pub use models::auth::AccessTokenClaims;
pub use services::{
    BillingService, EntitlementPolicy, JwtConfig, JwtError, JwtService, MemoryStore,
    PaymentGateway, PgStore, Store, StoryGenerator, StoryService, WebhookProcessor,
};
pub use utils::ServiceError;

/// Connect to PostgreSQL, run migrations and wire the production backends
pub async fn initialize_app_state(
    config: &AppConfig,
) -> Result<AppState, Box<dyn std::error::Error + Send + Sync>> {
    use std::sync::Arc;
    use tracing::info;

    info!("Initializing database pool...");
    let diesel_pool = db::create_diesel_pool(DieselDatabaseConfig::from(&config.database)).await?;

    if migrations::should_run_migrations(config) {
        info!("Running embedded migrations...");
        migrations::run_all_migrations(&diesel_pool, migrations::MigrationConfig::from(config))
            .await
            .map_err(|e| format!("Migration failed: {}", e))?;
    }

    let store = Arc::new(PgStore::new(Arc::new(diesel_pool)));
    let gateway = Arc::new(services::StripeClient::new(&config.stripe)?);
    let generator = Arc::new(services::HttpStoryGenerator::new(&config.generator)?);

    info!("Story generator endpoint: {}", generator.endpoint());

    Ok(AppState::new(config.clone(), store, gateway, generator)?)
}
