// Common test utilities and helper structs
// Shared across all test files to avoid duplication
#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use story_gen_backend::{
    app::{create_router, AppState},
    app_config::AppConfig,
    models::{UserStoryRequest, UserStoryResponse},
    services::{
        generator::GeneratorError,
        stripe::{CheckoutRequest, CheckoutSession, StripeCustomer, StripeSubscription},
        JwtConfig, JwtService, MemoryStore, PaymentError, PaymentGateway, StoryGenerator,
    },
};
use tower::util::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_integration_secret";
pub const PRICE_ONE_TIME: &str = "price_one_time_test";
pub const PRICE_MONTHLY: &str = "price_monthly_test";
pub const PRICE_YEARLY: &str = "price_yearly_test";
pub const FRONTEND_URL: &str = "https://app.storygen.test";

/// Configuration used by every integration test
pub fn test_config() -> AppConfig {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("ENVIRONMENT", "test"),
        ("DATABASE_URL", "postgres://unused@localhost/story_gen_test"),
        ("JWT_SECRET", "test-jwt-secret-hs256-at-least-32-chars"),
        ("STRIPE_SECRET_KEY", "sk_test_unused"),
        ("STRIPE_WEBHOOK_SECRET", WEBHOOK_SECRET),
        ("STRIPE_PRICE_ONE_TIME", PRICE_ONE_TIME),
        ("STRIPE_PRICE_MONTHLY", PRICE_MONTHLY),
        ("STRIPE_PRICE_YEARLY", PRICE_YEARLY),
        ("FRONTEND_URL", FRONTEND_URL),
        ("FREE_MONTHLY_LIMIT", "2"),
        ("CREDITS_PER_PACK", "3"),
        ("ENABLE_SWAGGER_UI", "true"),
        ("ENABLE_BACKGROUND_TASKS", "false"),
    ]);
    AppConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
        .expect("test config must load")
}

// =============================================================================
// STUB BACKENDS
// =============================================================================

/// In-process stand-in for Stripe
#[derive(Default)]
pub struct StubPaymentGateway {
    customers: Mutex<Vec<StripeCustomer>>,
    subscriptions: Mutex<Vec<StripeSubscription>>,
    checkouts: Mutex<Vec<CheckoutRequest>>,
}

impl StubPaymentGateway {
    pub fn add_customer(&self, id: &str, email: &str) {
        self.customers.lock().unwrap().push(StripeCustomer {
            id: id.to_string(),
            email: Some(email.to_string()),
            deleted: false,
            metadata: HashMap::new(),
        });
    }

    pub fn add_subscription(&self, subscription: serde_json::Value) {
        let subscription: StripeSubscription = serde_json::from_value(subscription).unwrap();
        self.subscriptions.lock().unwrap().push(subscription);
    }

    pub fn checkouts(&self) -> Vec<CheckoutRequest> {
        self.checkouts.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for StubPaymentGateway {
    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<StripeCustomer>, PaymentError> {
        Ok(self
            .customers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.email.as_deref() == Some(email))
            .cloned())
    }

    async fn create_customer(
        &self,
        email: &str,
        _user_id: Uuid,
    ) -> Result<StripeCustomer, PaymentError> {
        let mut customers = self.customers.lock().unwrap();
        let customer = StripeCustomer {
            id: format!("cus_stub_{}", customers.len() + 1),
            email: Some(email.to_string()),
            deleted: false,
            metadata: HashMap::new(),
        };
        customers.push(customer.clone());
        Ok(customer)
    }

    async fn retrieve_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<StripeCustomer>, PaymentError> {
        Ok(self
            .customers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == customer_id)
            .cloned())
    }

    async fn list_subscriptions(
        &self,
        customer_id: &str,
        price_id: Option<&str>,
    ) -> Result<Vec<StripeSubscription>, PaymentError> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.customer.id() == customer_id)
            .filter(|s| price_id.is_none() || s.price().map(|p| p.id.as_str()) == price_id)
            .cloned()
            .collect())
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<StripeSubscription>, PaymentError> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == subscription_id)
            .cloned())
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let mut checkouts = self.checkouts.lock().unwrap();
        checkouts.push(request.clone());
        let id = format!("cs_test_{}", checkouts.len());
        Ok(CheckoutSession {
            url: format!("https://checkout.stripe.test/pay/{}", id),
            id,
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        _return_url: &str,
    ) -> Result<String, PaymentError> {
        Ok(format!("https://billing.stripe.test/p/{}", customer_id))
    }
}

/// Generator that returns a canned story, or fails when told to
#[derive(Default)]
pub struct StubGenerator {
    pub fail: std::sync::atomic::AtomicBool,
    calls: AtomicUsize,
}

impl StubGenerator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoryGenerator for StubGenerator {
    async fn generate(
        &self,
        request: &UserStoryRequest,
    ) -> Result<UserStoryResponse, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(GeneratorError::Upstream {
                status: 503,
                body: "model overloaded".to_string(),
            });
        }

        Ok(UserStoryResponse {
            story: format!("As a user, I want {}", request.requirement),
            value_statement: "So that the product is useful".to_string(),
            acceptance_criteria: vec!["Given a user, when they act, then it works".to_string()],
            priority: "High".to_string(),
            effort_estimate: "3 points".to_string(),
            ..Default::default()
        })
    }
}

// =============================================================================
// TEST APPLICATION
// =============================================================================

/// Test application wrapper
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub store: MemoryStore,
    pub gateway: Arc<StubPaymentGateway>,
    pub generator: Arc<StubGenerator>,
    pub jwt_service: Arc<JwtService>,
}

/// Setup test application over in-memory backends
pub fn setup_test_app() -> TestApp {
    let config = test_config();
    let store = MemoryStore::new();
    let gateway = Arc::new(StubPaymentGateway::default());
    let generator = Arc::new(StubGenerator::default());
    let jwt_service = Arc::new(JwtService::new(JwtConfig::for_test()));

    let state = AppState::with_jwt(
        config,
        Arc::new(store.clone()),
        gateway.clone(),
        generator.clone(),
        jwt_service.clone(),
    );

    TestApp {
        app: create_router(state.clone()),
        state,
        store,
        gateway,
        generator,
        jwt_service,
    }
}

impl TestApp {
    /// Access token for a fresh or given user
    pub fn token_for(&self, user_id: Uuid, email: Option<&str>) -> String {
        self.jwt_service
            .generate_access_token(user_id, email, 3600)
            .unwrap()
    }

    pub fn post(&self, uri: &str) -> TestRequest<'_> {
        TestRequest::new(self, "POST", uri)
    }

    pub fn get(&self, uri: &str) -> TestRequest<'_> {
        TestRequest::new(self, "GET", uri)
    }

    pub fn delete(&self, uri: &str) -> TestRequest<'_> {
        TestRequest::new(self, "DELETE", uri)
    }
}

/// Test request builder
pub struct TestRequest<'a> {
    app: &'a TestApp,
    method: String,
    uri: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl<'a> TestRequest<'a> {
    fn new(app: &'a TestApp, method: &str, uri: &str) -> Self {
        Self {
            app,
            method: method.to_string(),
            uri: uri.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        let value = format!("Bearer {}", token);
        self.header("authorization", &value)
    }

    /// Add JSON body to request
    pub fn json<T: Serialize>(mut self, body: &T) -> Self {
        self.body = serde_json::to_vec(body).unwrap();
        self.header("content-type", "application/json")
    }

    /// Raw body, sent as-is
    pub fn raw(mut self, body: &[u8]) -> Self {
        self.body = body.to_vec();
        self.header("content-type", "application/json")
    }

    pub async fn send(self) -> TestResponse {
        let mut builder = Request::builder().method(self.method.as_str()).uri(&self.uri);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let request = builder.body(Body::from(self.body)).unwrap();

        let response = self.app.app.clone().oneshot(request).await.unwrap();
        TestResponse { response }
    }
}

/// Test response wrapper
pub struct TestResponse {
    response: Response<Body>,
}

impl TestResponse {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    }

    pub async fn json<T: serde::de::DeserializeOwned>(self) -> T {
        let body = axum::body::to_bytes(self.response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    pub async fn text(self) -> String {
        let body = axum::body::to_bytes(self.response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }
}

/// Stripe subscription object as the API returns it
pub fn stripe_subscription(
    id: &str,
    customer: &str,
    price: &str,
    status: &str,
    user_id: Option<Uuid>,
) -> serde_json::Value {
    let period_end = chrono::Utc::now().timestamp() + 30 * 86_400;
    let metadata = match user_id {
        Some(id) => serde_json::json!({ "user_id": id.to_string() }),
        None => serde_json::json!({}),
    };
    serde_json::json!({
        "id": id,
        "customer": customer,
        "status": status,
        "current_period_start": period_end - 30 * 86_400,
        "current_period_end": period_end,
        "cancel_at_period_end": false,
        "items": { "data": [{ "price": { "id": price, "recurring": { "interval": "month" } } }] },
        "metadata": metadata
    })
}

pub fn story_request(requirement: &str) -> serde_json::Value {
    serde_json::json!({
        "requirement": requirement,
        "context": "  Web app  ",
        "stakeholders": ["Admin", " "],
        "api_required": false
    })
}
