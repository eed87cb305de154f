// API documentation: utoipa-generated paths merged with hand-written extras
pub mod health;
pub mod swagger_ui;

use crate::app::AppState;
use crate::app_config::{AppConfig, Environment};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use utoipa::OpenApi;

use crate::config::{Plan, PlanInfo};
use crate::handlers::billing::{CheckoutBody, CheckoutResponse, PortalResponse};
use crate::models::{
    ApiErrorResponse, ApiSpec, ErrorScenario, StoryListResponse, TestCase, UserStory,
    UserStoryRequest, UserStoryResponse,
};
use crate::services::entitlement::{BillingStatusResponse, SubscriptionStatus, SubscriptionSummary};
use crate::services::GeneratedStory;

pub use swagger_ui::serve_swagger_ui;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::billing::get_status,
        crate::handlers::billing::sync_subscription,
        crate::handlers::billing::create_checkout_session,
        crate::handlers::billing::create_portal_session,
        crate::handlers::billing::list_plans,
        crate::handlers::stories::generate_story,
        crate::handlers::stories::list_stories,
        crate::handlers::stories::get_story,
        crate::handlers::stories::export_story_markdown,
        crate::handlers::stories::delete_story,
        crate::handlers::stories::delete_all_stories,
        crate::handlers::webhooks::stripe_webhook,
    ),
    components(
        schemas(
            BillingStatusResponse,
            SubscriptionStatus,
            SubscriptionSummary,
            CheckoutBody,
            CheckoutResponse,
            PortalResponse,
            Plan,
            PlanInfo,
            UserStoryRequest,
            UserStoryResponse,
            ErrorScenario,
            TestCase,
            ApiSpec,
            ApiErrorResponse,
            UserStory,
            StoryListResponse,
            GeneratedStory,
        )
    ),
    tags(
        (name = "Billing", description = "Entitlements, Stripe checkout and customer portal"),
        (name = "Stories", description = "User story generation and history"),
        (name = "Webhooks", description = "Stripe event delivery"),
        (name = "Health", description = "Service health checks")
    )
)]
struct ApiDoc;

/// Serve OpenAPI JSON specification at /api/v1/docs/openapi.json
pub async fn serve_openapi_spec(State(app_state): State<AppState>) -> Response {
    let spec = build_openapi_spec(app_state.config.as_ref());

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_string(&spec).unwrap_or_default(),
    )
        .into_response()
}

/// Build the complete OpenAPI specification
pub fn build_openapi_spec(config: &AppConfig) -> serde_json::Value {
    let mut spec = serde_json::to_value(ApiDoc::openapi()).unwrap_or_else(|_| json!({}));

    let api_url = match config.environment {
        Environment::Production | Environment::Staging => {
            format!("{}/api", config.frontend_url.trim_end_matches('/'))
        },
        _ => format!("http://localhost:{}/api", config.server.port),
    };

    spec["info"] = json!({
        "title": "Story Gen API",
        "description": "AI user story generation with freemium entitlements and Stripe billing",
        "version": env!("CARGO_PKG_VERSION")
    });
    spec["servers"] = json!([{
        "url": api_url,
        "description": format!("Current server ({})", config.environment)
    }]);

    if let Some(paths) = spec["paths"].as_object_mut() {
        paths.insert("/v1/health".to_string(), health::health_endpoint());
    }

    if !spec["components"].is_object() {
        spec["components"] = json!({});
    }
    spec["components"]["securitySchemes"] = json!({
        "bearerAuth": {
            "type": "http",
            "scheme": "bearer",
            "bearerFormat": "JWT",
            "description": "Access token issued by the identity provider"
        }
    });

    spec
}
