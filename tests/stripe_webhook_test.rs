// Stripe webhook endpoint: signature checks, idempotency and entitlement effects

mod common;

use axum::http::StatusCode;
use chrono::Utc;
use common::{setup_test_app, stripe_subscription, TestApp, PRICE_MONTHLY, WEBHOOK_SECRET};
use serde_json::{json, Value};
use story_gen_backend::services::webhook::sign_payload;
use uuid::Uuid;

async fn deliver(app: &TestApp, event: &Value) -> (StatusCode, Value) {
    let payload = serde_json::to_vec(event).unwrap();
    let signature = sign_payload(WEBHOOK_SECRET, Utc::now().timestamp(), &payload);

    let response = app
        .post("/api/v1/webhooks/stripe")
        .header("stripe-signature", &signature)
        .raw(&payload)
        .send()
        .await;
    let status = response.status();
    (status, response.json().await)
}

fn checkout_paid(event_id: &str, session_id: &str, user_id: Uuid) -> Value {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "created": Utc::now().timestamp(),
        "data": {
            "object": {
                "id": session_id,
                "mode": "payment",
                "payment_status": "paid",
                "customer": "cus_paid",
                "client_reference_id": user_id.to_string(),
                "metadata": { "user_id": user_id.to_string(), "plan": "one_time" }
            }
        }
    })
}

async fn remaining_credits(app: &TestApp, user_id: Uuid) -> Value {
    let token = app.token_for(user_id, None);
    let status: Value = app
        .get("/api/v1/billing/status")
        .bearer(&token)
        .send()
        .await
        .json()
        .await;
    status["remainingOneTimeCredits"].clone()
}

#[tokio::test]
async fn test_missing_signature_is_rejected() {
    let app = setup_test_app();
    let payload = serde_json::to_vec(&checkout_paid("evt_1", "cs_1", Uuid::new_v4())).unwrap();

    let response = app.post("/api/v1/webhooks/stripe").raw(&payload).send().await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_wrong_secret_is_rejected() {
    let app = setup_test_app();
    let user_id = Uuid::new_v4();
    let payload = serde_json::to_vec(&checkout_paid("evt_1", "cs_1", user_id)).unwrap();
    let signature = sign_payload("whsec_someone_else", Utc::now().timestamp(), &payload);

    let response = app
        .post("/api/v1/webhooks/stripe")
        .header("stripe-signature", &signature)
        .raw(&payload)
        .send()
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(remaining_credits(&app, user_id).await, 0);
}

#[tokio::test]
async fn test_stale_timestamp_is_rejected() {
    let app = setup_test_app();
    let payload = serde_json::to_vec(&checkout_paid("evt_1", "cs_1", Uuid::new_v4())).unwrap();
    let signature = sign_payload(WEBHOOK_SECRET, Utc::now().timestamp() - 3600, &payload);

    let response = app
        .post("/api/v1/webhooks/stripe")
        .header("stripe-signature", &signature)
        .raw(&payload)
        .send()
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_out_of_range_timestamp_is_rejected() {
    let app = setup_test_app();
    let payload = serde_json::to_vec(&checkout_paid("evt_1", "cs_1", Uuid::new_v4())).unwrap();
    let signature = format!("t=-9223372036000000000,v1={}", "00".repeat(32));

    let response = app
        .post("/api/v1/webhooks/stripe")
        .header("stripe-signature", &signature)
        .raw(&payload)
        .send()
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.store.credit_lots().await.is_empty());
}

#[tokio::test]
async fn test_paid_checkout_grants_credit_pack_once() {
    let app = setup_test_app();
    let user_id = Uuid::new_v4();
    let event = checkout_paid("evt_pack", "cs_pack", user_id);

    let (status, body) = deliver(&app, &event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));
    assert_eq!(remaining_credits(&app, user_id).await, 3);

    let (status, body) = deliver(&app, &event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["duplicate"], true);
    assert_eq!(remaining_credits(&app, user_id).await, 3);
}

#[tokio::test]
async fn test_async_payment_for_same_session_does_not_double_grant() {
    let app = setup_test_app();
    let user_id = Uuid::new_v4();

    deliver(&app, &checkout_paid("evt_a", "cs_same", user_id)).await;
    let mut retry = checkout_paid("evt_b", "cs_same", user_id);
    retry["type"] = json!("checkout.session.async_payment_succeeded");
    let (status, _) = deliver(&app, &retry).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(remaining_credits(&app, user_id).await, 3);
}

#[tokio::test]
async fn test_unhandled_event_type_is_acknowledged() {
    let app = setup_test_app();
    let event = json!({
        "id": "evt_ping",
        "type": "charge.refunded",
        "created": Utc::now().timestamp(),
        "data": { "object": {} }
    });

    let (status, body) = deliver(&app, &event).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ignored"], true);
}

#[tokio::test]
async fn test_subscription_lifecycle_updates_entitlement() {
    let app = setup_test_app();
    let user_id = Uuid::new_v4();
    let token = app.token_for(user_id, None);
    let subscription = stripe_subscription("sub_life", "cus_life", PRICE_MONTHLY, "active", Some(user_id));

    let created = json!({
        "id": "evt_created",
        "type": "customer.subscription.created",
        "created": Utc::now().timestamp(),
        "data": { "object": subscription.clone() }
    });
    let (status, _) = deliver(&app, &created).await;
    assert_eq!(status, StatusCode::OK);

    let active: Value = app
        .get("/api/v1/billing/status")
        .bearer(&token)
        .send()
        .await
        .json()
        .await;
    assert_eq!(active["status"], "subscribed");
    assert_eq!(active["subscription"]["plan"], "monthly");

    let deleted = json!({
        "id": "evt_deleted",
        "type": "customer.subscription.deleted",
        "created": Utc::now().timestamp(),
        "data": { "object": subscription }
    });
    let (status, _) = deliver(&app, &deleted).await;
    assert_eq!(status, StatusCode::OK);

    let canceled: Value = app
        .get("/api/v1/billing/status")
        .bearer(&token)
        .send()
        .await
        .json()
        .await;
    assert_eq!(canceled["hasActiveSubscription"], false);
    assert_eq!(canceled["subscription"]["status"], "canceled");
}

#[tokio::test]
async fn test_malformed_object_is_client_error() {
    let app = setup_test_app();
    let event = json!({
        "id": "evt_bad",
        "type": "customer.subscription.updated",
        "created": Utc::now().timestamp(),
        "data": { "object": { "id": 42 } }
    });

    let (status, _) = deliver(&app, &event).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}
