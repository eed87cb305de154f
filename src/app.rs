// Application state and router assembly
use axum::{middleware::from_fn_with_state, Router};
use chrono::Duration;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::{
    app_config::AppConfig,
    config::PlanCatalog,
    handlers,
    middleware::{auth_middleware, cors_layer},
    services::{
        BillingService, EntitlementPolicy, JwtConfig, JwtError, JwtService, PaymentGateway,
        Store, StoryGenerator, StoryService, WebhookProcessor,
    },
};

// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub jwt_service: Arc<JwtService>,
    pub catalog: Arc<PlanCatalog>,
    pub billing_service: Arc<BillingService>,
    pub story_service: Arc<StoryService>,
    pub webhook_processor: Arc<WebhookProcessor>,
}

impl AppState {
    /// Wire services over the given backends
    pub fn new(
        config: AppConfig,
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        generator: Arc<dyn StoryGenerator>,
    ) -> Result<Self, JwtError> {
        let jwt_service = Arc::new(JwtService::new(JwtConfig::from_app_config(&config.jwt)?));
        Ok(Self::with_jwt(config, store, gateway, generator, jwt_service))
    }

    pub fn with_jwt(
        config: AppConfig,
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        generator: Arc<dyn StoryGenerator>,
        jwt_service: Arc<JwtService>,
    ) -> Self {
        let policy = EntitlementPolicy::from(&config.entitlement);
        let reservation_ttl = Duration::seconds(config.entitlement.reservation_ttl as i64);
        let catalog = Arc::new(PlanCatalog::new(
            &config.stripe,
            config.entitlement.credits_per_pack,
        ));

        let billing_service = Arc::new(BillingService::new(
            store.clone(),
            gateway.clone(),
            catalog.clone(),
            policy,
            reservation_ttl,
        ));
        let story_service = Arc::new(StoryService::new(
            store.clone(),
            generator,
            policy,
            reservation_ttl,
        ));
        let webhook_processor = Arc::new(WebhookProcessor::new(
            store.clone(),
            gateway,
            catalog.clone(),
        ));

        Self {
            config: Arc::new(config),
            store,
            jwt_service,
            catalog,
            billing_service,
            story_service,
            webhook_processor,
        }
    }
}

/// Build the full HTTP router
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .nest("/billing", handlers::billing_routes())
        .nest("/stories", handlers::story_routes())
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    let public = Router::new()
        .merge(handlers::public_routes(state.config.features.enable_swagger_ui))
        .nest("/webhooks", handlers::webhook_routes());

    Router::new()
        .nest("/api/v1", public.merge(protected))
        .layer(cors_layer(
            &state.config.cors_allowed_origins,
            state.config.is_production(),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
