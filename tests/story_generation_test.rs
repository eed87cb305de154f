// Story generation through the HTTP API, charged against the entitlement ledger

mod common;

use axum::http::StatusCode;
use common::{setup_test_app, story_request};
use serde_json::Value;
use story_gen_backend::models::CreditGrant;
use story_gen_backend::services::BillingStore;
use uuid::Uuid;

#[tokio::test]
async fn test_generate_requires_token() {
    let app = setup_test_app();

    let response = app
        .post("/api/v1/stories")
        .json(&story_request("export reports"))
        .send()
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await;
    assert_eq!(body["status"], 401);
    assert_eq!(app.generator.calls(), 0);
}

#[tokio::test]
async fn test_generate_rejects_garbage_token() {
    let app = setup_test_app();

    let response = app
        .post("/api/v1/stories")
        .bearer("not-a-jwt")
        .json(&story_request("export reports"))
        .send()
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_generate_stores_story_and_reports_entitlement() {
    let app = setup_test_app();
    let user_id = Uuid::new_v4();
    let token = app.token_for(user_id, Some("writer@example.com"));

    let response = app
        .post("/api/v1/stories")
        .bearer(&token)
        .json(&story_request("  export reports as CSV  "))
        .send()
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await;

    let story = &body["story"];
    assert_eq!(story["user_id"], user_id.to_string());
    assert_eq!(story["requirement"], "export reports as CSV");
    assert_eq!(story["context"], "Web app");
    assert_eq!(story["stakeholders"], serde_json::json!(["Admin"]));
    assert_eq!(story["result"]["story"], "As a user, I want export reports as CSV");

    let entitlement = &body["entitlement"];
    assert_eq!(entitlement["freeGenerationsUsed"], 1);
    assert_eq!(entitlement["remainingFreeGenerations"], 1);
    assert_eq!(entitlement["canGenerate"], true);
}

#[tokio::test]
async fn test_free_allowance_exhausted_returns_payment_required() {
    let app = setup_test_app();
    let token = app.token_for(Uuid::new_v4(), Some("free@example.com"));

    for _ in 0..2 {
        let response = app
            .post("/api/v1/stories")
            .bearer(&token)
            .json(&story_request("search orders"))
            .send()
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .post("/api/v1/stories")
        .bearer(&token)
        .json(&story_request("search orders"))
        .send()
        .await;

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body: Value = response.json().await;
    assert_eq!(body["status"], 402);
    assert_eq!(body["entitlement"]["canGenerate"], false);
    assert_eq!(body["entitlement"]["remainingFreeGenerations"], 0);
    assert_eq!(body["entitlement"]["remainingOneTimeCredits"], 0);
    // The generator is never called once the limit is hit
    assert_eq!(app.generator.calls(), 2);
}

#[tokio::test]
async fn test_credits_are_spent_after_free_allowance() {
    let app = setup_test_app();
    let user_id = Uuid::new_v4();
    let token = app.token_for(user_id, None);

    app.store
        .grant_credits(&CreditGrant::new(user_id, 3, "cs_test_pack"))
        .await
        .unwrap();

    let mut last = Value::Null;
    for _ in 0..3 {
        let response = app
            .post("/api/v1/stories")
            .bearer(&token)
            .json(&story_request("invite teammates"))
            .send()
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        last = response.json().await;
    }

    assert_eq!(last["entitlement"]["remainingFreeGenerations"], 0);
    assert_eq!(last["entitlement"]["remainingOneTimeCredits"], 2);
}

#[tokio::test]
async fn test_empty_requirement_is_rejected_without_charge() {
    let app = setup_test_app();
    let user_id = Uuid::new_v4();
    let token = app.token_for(user_id, None);

    let response = app
        .post("/api/v1/stories")
        .bearer(&token)
        .json(&serde_json::json!({ "requirement": "   " }))
        .send()
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await;
    assert_eq!(body["error"], "Requirement is required");
    assert!(app.store.usage_events().await.is_empty());
    assert_eq!(app.generator.calls(), 0);
}

#[tokio::test]
async fn test_generator_failure_releases_reservation() {
    let app = setup_test_app();
    let token = app.token_for(Uuid::new_v4(), None);
    app.generator.set_failing(true);

    let response = app
        .post("/api/v1/stories")
        .bearer(&token)
        .json(&story_request("bulk import"))
        .send()
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(app.store.usage_events().await.is_empty());

    let status: Value = app
        .get("/api/v1/billing/status")
        .bearer(&token)
        .send()
        .await
        .json()
        .await;
    assert_eq!(status["freeGenerationsUsed"], 0);
    assert_eq!(status["canGenerate"], true);
}
