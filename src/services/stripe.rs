// Stripe gateway: the async-stripe client behind a trait, plus the subset of
// Stripe objects the ledger reads (from API responses and webhook payloads)

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::app_config::StripeConfig;
use crate::config::{CheckoutMode, Plan, PlanCatalog};
use crate::models::{SubscriptionRecord, SubscriptionState};

// =============================================================================
// ERROR TYPES
// =============================================================================

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Network error: {0}")]
    Http(String),

    #[error("Stripe API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to encode or decode Stripe data: {0}")]
    Decode(String),

    #[error("Invalid Stripe id: {0}")]
    InvalidId(String),

    #[error("Payments not configured: {0}")]
    NotConfigured(String),
}

impl From<stripe::StripeError> for PaymentError {
    fn from(error: stripe::StripeError) -> Self {
        match error {
            stripe::StripeError::Stripe(request_error) => PaymentError::Api {
                status: request_error.http_status,
                message: request_error
                    .message
                    .unwrap_or_else(|| "Unknown error".to_string()),
            },
            stripe::StripeError::Timeout => PaymentError::Http("request timed out".to_string()),
            stripe::StripeError::ClientError(msg) => PaymentError::Http(msg),
            other => PaymentError::Decode(other.to_string()),
        }
    }
}

impl PaymentError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PaymentError::Api { status: 404, .. })
    }
}

// =============================================================================
// DATA STRUCTURES
// =============================================================================

/// A reference that Stripe returns either as a bare id or as an expanded object
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) => id,
            Expandable::Object { id } => id,
        }
    }
}

impl From<stripe::Expandable<stripe::Customer>> for Expandable {
    fn from(customer: stripe::Expandable<stripe::Customer>) -> Self {
        match customer {
            stripe::Expandable::Id(id) => Expandable::Id(id.to_string()),
            stripe::Expandable::Object(c) => Expandable::Id(c.id.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl From<stripe::Customer> for StripeCustomer {
    fn from(customer: stripe::Customer) -> Self {
        Self {
            id: customer.id.to_string(),
            email: customer.email,
            deleted: customer.deleted,
            metadata: customer.metadata.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeRecurring {
    pub interval: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePrice {
    pub id: String,
    #[serde(default)]
    pub recurring: Option<StripeRecurring>,
}

impl From<stripe::Price> for StripePrice {
    fn from(price: stripe::Price) -> Self {
        Self {
            id: price.id.to_string(),
            recurring: price.recurring.map(|r| StripeRecurring {
                interval: r.interval.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscriptionItem {
    pub price: StripePrice,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: Expandable,
    pub status: String,
    pub current_period_start: i64,
    pub current_period_end: i64,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub canceled_at: Option<i64>,
    pub items: StripeList<StripeSubscriptionItem>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn subscription_status(status: stripe::SubscriptionStatus) -> &'static str {
    match status {
        stripe::SubscriptionStatus::Active => "active",
        stripe::SubscriptionStatus::Canceled => "canceled",
        stripe::SubscriptionStatus::Incomplete => "incomplete",
        stripe::SubscriptionStatus::IncompleteExpired => "incomplete_expired",
        stripe::SubscriptionStatus::PastDue => "past_due",
        stripe::SubscriptionStatus::Trialing => "trialing",
        stripe::SubscriptionStatus::Unpaid => "unpaid",
        stripe::SubscriptionStatus::Paused => "paused",
    }
}

impl From<stripe::Subscription> for StripeSubscription {
    fn from(subscription: stripe::Subscription) -> Self {
        let items = subscription.items;
        Self {
            id: subscription.id.to_string(),
            customer: subscription.customer.into(),
            status: subscription_status(subscription.status).to_string(),
            current_period_start: subscription.current_period_start,
            current_period_end: subscription.current_period_end,
            cancel_at_period_end: subscription.cancel_at_period_end,
            canceled_at: subscription.canceled_at,
            items: StripeList {
                has_more: items.has_more,
                data: items
                    .data
                    .into_iter()
                    .filter_map(|item| item.price)
                    .map(|price| StripeSubscriptionItem {
                        price: price.into(),
                    })
                    .collect(),
            },
            metadata: subscription.metadata,
        }
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

impl StripeSubscription {
    pub fn price(&self) -> Option<&StripePrice> {
        self.items.data.first().map(|item| &item.price)
    }

    pub fn state(&self) -> Option<SubscriptionState> {
        self.status.parse().ok()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_some_and(|s| s.grants_access())
    }

    /// Plan from the configured price ids, else from the billing interval
    pub fn plan(&self, catalog: &PlanCatalog) -> Plan {
        let price = self.price();
        price
            .and_then(|p| catalog.plan_for_price(&p.id))
            .filter(|plan| plan.is_recurring())
            .or_else(|| {
                price
                    .and_then(|p| p.recurring.as_ref())
                    .and_then(|r| Plan::from_interval(&r.interval))
            })
            .unwrap_or(Plan::Monthly)
    }

    pub fn to_record(&self, user_id: Uuid, catalog: &PlanCatalog) -> SubscriptionRecord {
        let now = Utc::now();
        SubscriptionRecord {
            stripe_subscription_id: self.id.clone(),
            user_id,
            stripe_customer_id: self.customer.id().to_string(),
            plan: self.plan(catalog).as_str().to_string(),
            status: self.status.clone(),
            price_id: self.price().map(|p| p.id.clone()),
            current_period_start: timestamp(self.current_period_start),
            current_period_end: timestamp(self.current_period_end),
            cancel_at_period_end: self.cancel_at_period_end,
            canceled_at: self.canceled_at.map(timestamp),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Checkout session as returned when creating one
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub mode: CheckoutMode,
    pub price_id: String,
    pub customer_id: String,
    pub user_id: Uuid,
    pub plan: Plan,
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutRequest {
    fn session_metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            ("user_id".to_string(), self.user_id.to_string()),
            ("plan".to_string(), self.plan.as_str().to_string()),
        ])
    }

    /// Subscriptions carry the user id too, so renewals resolve without the session
    fn subscription_metadata(&self) -> Option<HashMap<String, String>> {
        (self.mode == CheckoutMode::Subscription)
            .then(|| HashMap::from([("user_id".to_string(), self.user_id.to_string())]))
    }

    fn params<'a>(
        &'a self,
        customer: stripe::CustomerId,
        client_reference_id: &'a str,
    ) -> stripe::CreateCheckoutSession<'a> {
        let mut params = stripe::CreateCheckoutSession::new();
        params.customer = Some(customer);
        params.mode = Some(match self.mode {
            CheckoutMode::Payment => stripe::CheckoutSessionMode::Payment,
            CheckoutMode::Subscription => stripe::CheckoutSessionMode::Subscription,
        });
        params.success_url = Some(&self.success_url);
        params.cancel_url = Some(&self.cancel_url);
        params.client_reference_id = Some(client_reference_id);
        params.line_items = Some(vec![stripe::CreateCheckoutSessionLineItems {
            price: Some(self.price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.metadata = Some(self.session_metadata());
        params.subscription_data =
            self.subscription_metadata()
                .map(|metadata| stripe::CreateCheckoutSessionSubscriptionData {
                    metadata: Some(metadata),
                    ..Default::default()
                });
        params
    }
}

// =============================================================================
// GATEWAY
// =============================================================================

/// The payment processor operations the billing flows need
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn find_customer_by_email(&self, email: &str)
        -> Result<Option<StripeCustomer>, PaymentError>;

    async fn create_customer(&self, email: &str, user_id: Uuid)
        -> Result<StripeCustomer, PaymentError>;

    /// None when the customer does not exist or was deleted
    async fn retrieve_customer(&self, customer_id: &str)
        -> Result<Option<StripeCustomer>, PaymentError>;

    /// All subscriptions of a customer in any status, optionally filtered by price
    async fn list_subscriptions(
        &self,
        customer_id: &str,
        price_id: Option<&str>,
    ) -> Result<Vec<StripeSubscription>, PaymentError>;

    async fn list_active_subscriptions(
        &self,
        customer_id: &str,
        price_id: Option<&str>,
    ) -> Result<Vec<StripeSubscription>, PaymentError> {
        let subscriptions = self.list_subscriptions(customer_id, price_id).await?;
        Ok(subscriptions.into_iter().filter(|s| s.is_active()).collect())
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<StripeSubscription>, PaymentError>;

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError>;

    /// Billing portal URL for a customer
    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, PaymentError>;
}

#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
    api_base: String,
    request_timeout: Duration,
}

// Debug implementation that doesn't expose the secret key
impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.api_base)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

fn parse_id<T: std::str::FromStr>(kind: &str, id: &str) -> Result<T, PaymentError> {
    id.parse()
        .map_err(|_| PaymentError::InvalidId(format!("{} {}", kind, id)))
}

fn not_found_as_none<T>(result: Result<T, PaymentError>) -> Result<Option<T>, PaymentError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Result<Self, PaymentError> {
        let secret_key = config.secret_key.trim();
        if secret_key.is_empty() {
            return Err(PaymentError::NotConfigured(
                "STRIPE_SECRET_KEY is empty".to_string(),
            ));
        }

        // from_url panics on a malformed base, so reject it here
        let api_base = url::Url::parse(&config.api_base).map_err(|e| {
            PaymentError::NotConfigured(format!("STRIPE_API_BASE is invalid: {}", e))
        })?;

        let client = stripe::Client::from_url(api_base.as_str(), secret_key).with_app_info(
            "story-gen-backend".to_string(),
            Some(env!("CARGO_PKG_VERSION").to_string()),
            None,
        );

        Ok(Self {
            client,
            api_base: api_base.to_string(),
            request_timeout: Duration::from_secs(config.request_timeout),
        })
    }

    /// Client that sends an idempotency key, for creating objects
    fn idempotent_client(&self, operation: &str) -> stripe::Client {
        let key = format!("{}_{}", operation, Uuid::new_v4());
        self.client
            .clone()
            .with_strategy(stripe::RequestStrategy::Idempotent(key))
    }

    async fn call<T, F>(&self, operation: &str, request: F) -> Result<T, PaymentError>
    where
        T: Send,
        F: Future<Output = Result<T, stripe::StripeError>> + Send,
    {
        let result = match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result.map_err(PaymentError::from),
            Err(_) => Err(PaymentError::Http(format!(
                "{} timed out after {}s",
                operation,
                self.request_timeout.as_secs()
            ))),
        };

        if let Err(e) = &result {
            if !e.is_not_found() {
                warn!("Stripe {} failed: {}", operation, e);
            }
        }
        result
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    #[instrument(skip(self, email))]
    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<StripeCustomer>, PaymentError> {
        let mut params = stripe::ListCustomers::new();
        params.email = Some(email);
        params.limit = Some(1);

        let customers = self
            .call("list_customers", stripe::Customer::list(&self.client, &params))
            .await?;
        Ok(customers
            .data
            .into_iter()
            .map(StripeCustomer::from)
            .find(|c| !c.deleted))
    }

    #[instrument(skip(self, email))]
    async fn create_customer(
        &self,
        email: &str,
        user_id: Uuid,
    ) -> Result<StripeCustomer, PaymentError> {
        let client = self.idempotent_client("create_customer");
        let mut params = stripe::CreateCustomer::new();
        params.email = Some(email);
        params.metadata = Some(HashMap::from([(
            "user_id".to_string(),
            user_id.to_string(),
        )]));

        let customer = self
            .call("create_customer", stripe::Customer::create(&client, params))
            .await?;
        debug!("Created Stripe customer {}", customer.id);
        Ok(customer.into())
    }

    async fn retrieve_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<StripeCustomer>, PaymentError> {
        let id: stripe::CustomerId = parse_id("customer", customer_id)?;
        let customer = not_found_as_none(
            self.call(
                "retrieve_customer",
                stripe::Customer::retrieve(&self.client, &id, &[]),
            )
            .await,
        )?;
        Ok(customer.map(StripeCustomer::from).filter(|c| !c.deleted))
    }

    #[instrument(skip(self))]
    async fn list_subscriptions(
        &self,
        customer_id: &str,
        price_id: Option<&str>,
    ) -> Result<Vec<StripeSubscription>, PaymentError> {
        let mut params = stripe::ListSubscriptions::new();
        params.customer = Some(parse_id("customer", customer_id)?);
        params.price = price_id.map(|p| parse_id("price", p)).transpose()?;
        params.status = Some(stripe::SubscriptionStatusFilter::All);
        params.limit = Some(100);

        let subscriptions = self
            .call(
                "list_subscriptions",
                stripe::Subscription::list(&self.client, &params),
            )
            .await?;
        if subscriptions.has_more {
            warn!("Customer {} has more than 100 subscriptions", customer_id);
        }
        Ok(subscriptions
            .data
            .into_iter()
            .map(StripeSubscription::from)
            .collect())
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<StripeSubscription>, PaymentError> {
        let id: stripe::SubscriptionId = parse_id("subscription", subscription_id)?;
        let subscription = not_found_as_none(
            self.call(
                "retrieve_subscription",
                stripe::Subscription::retrieve(&self.client, &id, &[]),
            )
            .await,
        )?;
        Ok(subscription.map(StripeSubscription::from))
    }

    #[instrument(skip(self, request), fields(plan = %request.plan))]
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let client = self.idempotent_client("create_checkout_session");
        let customer = parse_id("customer", &request.customer_id)?;
        let client_reference_id = request.user_id.to_string();
        let params = request.params(customer, &client_reference_id);

        let session = self
            .call(
                "create_checkout_session",
                stripe::CheckoutSession::create(&client, params),
            )
            .await?;

        let url = session
            .url
            .ok_or_else(|| PaymentError::Decode("checkout session has no url".to_string()))?;
        Ok(CheckoutSession {
            id: session.id.to_string(),
            url,
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, PaymentError> {
        let mut params = stripe::CreateBillingPortalSession::new(parse_id("customer", customer_id)?);
        params.return_url = Some(return_url);

        let session = self
            .call(
                "create_portal_session",
                stripe::BillingPortalSession::create(&self.client, params),
            )
            .await?;
        Ok(session.url)
    }
}
