// Billing handlers: entitlement status, Stripe sync, checkout and customer portal

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    app::AppState,
    config::{Plan, PlanInfo},
    middleware::AuthenticatedUser,
    services::{billing::resolve_origin, BillingStatusResponse},
    utils::service_error::ServiceError,
};

/// Checkout request body
#[derive(Debug, Deserialize, ToSchema)]
#[schema(example = json!({"plan": "monthly"}))]
pub struct CheckoutBody {
    /// one_time, monthly or yearly
    pub plan: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub url: String,
    pub session_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PortalResponse {
    pub url: String,
}

fn request_origin(state: &AppState, headers: &HeaderMap) -> String {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    resolve_origin(origin, &state.config.frontend_url)
}

/// Entitlement status of the caller
/// GET /api/v1/billing/status
#[utoipa::path(
    get,
    path = "/v1/billing/status",
    tag = "Billing",
    operation_id = "getBillingStatus",
    responses(
        (status = 200, description = "Current entitlement", body = BillingStatusResponse),
        (status = 401, description = "Unauthorized - invalid or missing token")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_status(
    State(state): State<AppState>,
    auth_user: AuthenticatedUser,
) -> Result<impl IntoResponse, ServiceError> {
    let decision = state
        .billing_service
        .status(auth_user.user_id, auth_user.email())
        .await?;
    Ok(Json(BillingStatusResponse::from(&decision)))
}

/// Pull subscription state from Stripe, then report the entitlement
/// POST /api/v1/billing/sync
#[utoipa::path(
    post,
    path = "/v1/billing/sync",
    tag = "Billing",
    operation_id = "syncSubscription",
    responses(
        (status = 200, description = "Entitlement after reconciliation", body = BillingStatusResponse),
        (status = 401, description = "Unauthorized - invalid or missing token"),
        (status = 502, description = "Stripe unavailable")
    ),
    security(("bearerAuth" = []))
)]
pub async fn sync_subscription(
    State(state): State<AppState>,
    auth_user: AuthenticatedUser,
) -> Result<impl IntoResponse, ServiceError> {
    let decision = state
        .billing_service
        .sync(auth_user.user_id, auth_user.email())
        .await?;
    Ok(Json(BillingStatusResponse::from(&decision)))
}

/// Start a Stripe Checkout session
/// POST /api/v1/billing/checkout
#[utoipa::path(
    post,
    path = "/v1/billing/checkout",
    tag = "Billing",
    operation_id = "createCheckoutSession",
    request_body = CheckoutBody,
    responses(
        (status = 200, description = "Checkout session created", body = CheckoutResponse),
        (status = 400, description = "Invalid plan or missing email"),
        (status = 401, description = "Unauthorized - invalid or missing token"),
        (status = 409, description = "Already subscribed to this plan"),
        (status = 500, description = "Plan price not configured")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    auth_user: AuthenticatedUser,
    headers: HeaderMap,
    Json(body): Json<CheckoutBody>,
) -> Result<impl IntoResponse, ServiceError> {
    let plan: Plan = body.plan.trim().parse()?;
    let origin = request_origin(&state, &headers);

    let session = state
        .billing_service
        .create_checkout(auth_user.user_id, auth_user.email(), plan, &origin)
        .await?;

    Ok(Json(CheckoutResponse {
        url: session.url,
        session_id: session.id,
    }))
}

/// Open the Stripe customer portal
/// POST /api/v1/billing/portal
#[utoipa::path(
    post,
    path = "/v1/billing/portal",
    tag = "Billing",
    operation_id = "createPortalSession",
    responses(
        (status = 200, description = "Portal session created", body = PortalResponse),
        (status = 401, description = "Unauthorized - invalid or missing token"),
        (status = 404, description = "No billing account yet")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_portal_session(
    State(state): State<AppState>,
    auth_user: AuthenticatedUser,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ServiceError> {
    let return_url = format!("{}/subscription", request_origin(&state, &headers));
    let url = state
        .billing_service
        .create_portal(auth_user.user_id, &return_url)
        .await?;
    Ok(Json(PortalResponse { url }))
}

/// Purchasable plans
/// GET /api/v1/plans
#[utoipa::path(
    get,
    path = "/v1/plans",
    tag = "Billing",
    operation_id = "listPlans",
    responses(
        (status = 200, description = "Available plans", body = [PlanInfo])
    )
)]
pub async fn list_plans(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.catalog.describe()))
}
