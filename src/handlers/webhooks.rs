// Stripe webhook endpoint

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    app::AppState,
    services::webhook::{verify_signature, WebhookOutcome},
    utils::service_error::ServiceError,
};

const SIGNATURE_HEADER: &str = "stripe-signature";

/// Receive a Stripe event
/// POST /api/v1/webhooks/stripe
#[utoipa::path(
    post,
    path = "/v1/webhooks/stripe",
    tag = "Webhooks",
    operation_id = "stripeWebhook",
    request_body(content = String, description = "Raw Stripe event JSON", content_type = "application/json"),
    params(("Stripe-Signature" = String, Header, description = "t=<timestamp>,v1=<hex hmac>")),
    responses(
        (status = 200, description = "Event acknowledged"),
        (status = 400, description = "Missing or invalid signature, or malformed event"),
        (status = 500, description = "Processing failed; Stripe will retry")
    )
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let stripe = &state.config.stripe;

    let event = verify_signature(
        &body,
        signature,
        &stripe.webhook_secret,
        stripe.webhook_tolerance,
        Utc::now().timestamp(),
    )
    .inspect_err(|e| warn!("Rejected webhook: {}", e))?;

    info!("Received Stripe event {} ({})", event.id, event.event_type);

    let response = match state.webhook_processor.handle_event(&event).await? {
        WebhookOutcome::AlreadyProcessed => json!({ "received": true, "duplicate": true }),
        WebhookOutcome::Ignored => json!({ "received": true, "ignored": true }),
        WebhookOutcome::Processed | WebhookOutcome::UserNotFound => json!({ "received": true }),
    };

    Ok(Json(response))
}
