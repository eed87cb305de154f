// HTTP handlers and route builders

pub mod billing;
pub mod docs;
pub mod health;
pub mod stories;
pub mod webhooks;

use crate::app::AppState;
use axum::{
    routing::{get, post},
    Router,
};

// Billing routes (authenticated)
pub fn billing_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(billing::get_status))
        .route("/sync", post(billing::sync_subscription))
        .route("/checkout", post(billing::create_checkout_session))
        .route("/portal", post(billing::create_portal_session))
}

// Story routes (authenticated)
pub fn story_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            post(stories::generate_story)
                .get(stories::list_stories)
                .delete(stories::delete_all_stories),
        )
        .route(
            "/{id}",
            get(stories::get_story).delete(stories::delete_story),
        )
        .route("/{id}/markdown", get(stories::export_story_markdown))
}

// Stripe webhook routes (signature-authenticated)
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/stripe", post(webhooks::stripe_webhook))
}

// Unauthenticated routes: health, plans and API docs
pub fn public_routes(enable_swagger_ui: bool) -> Router<AppState> {
    let router = Router::new()
        .route("/health", get(health::health_check))
        .route("/plans", get(billing::list_plans))
        .route("/docs/openapi.json", get(docs::serve_openapi_spec));

    if enable_swagger_ui {
        router.route("/docs", get(docs::serve_swagger_ui))
    } else {
        router
    }
}
