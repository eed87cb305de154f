// Stripe webhook handling: signature verification, idempotency and ledger updates

use chrono::Utc;
use ring::hmac;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use stripe::EventType;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::PlanCatalog;
use crate::models::{CreditGrant, SubscriptionState};
use crate::services::store::{Store, StoreError};
use crate::services::stripe::{Expandable, PaymentError, PaymentGateway, StripeSubscription};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("No Stripe signature found")]
    MissingSignature,

    #[error("Webhook signature verification failed")]
    InvalidSignature,

    #[error("Webhook timestamp outside tolerance")]
    TimestampOutOfTolerance,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WebhookError {
    /// Signature and payload problems are the sender's fault; everything else is retryable
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            WebhookError::MissingSignature
                | WebhookError::InvalidSignature
                | WebhookError::TimestampOutOfTolerance
                | WebhookError::InvalidPayload(_)
        )
    }
}

// =============================================================================
// EVENTS
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
    #[serde(default)]
    pub created: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    /// Typed event kind; None for types the SDK does not know
    pub fn kind(&self) -> Option<EventType> {
        serde_json::from_value(serde_json::Value::String(self.event_type.clone())).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    /// Event type we do not act on; not recorded
    Ignored,
    AlreadyProcessed,
    /// No local user could be matched; recorded so Stripe stops retrying
    UserNotFound,
}

#[derive(Debug, Default, Deserialize)]
struct CustomerDetails {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    id: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    customer: Option<Expandable>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    customer_details: Option<CustomerDetails>,
    #[serde(default)]
    subscription: Option<Expandable>,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceObject {
    #[serde(default)]
    customer: Option<Expandable>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    subscription: Option<Expandable>,
}

/// Everything an event tells us about who it belongs to
#[derive(Debug, Default)]
struct UserHints<'a> {
    metadata_user_id: Option<&'a str>,
    client_reference_id: Option<&'a str>,
    subscription_id: Option<&'a str>,
    customer_id: Option<&'a str>,
    email: Option<&'a str>,
}

// =============================================================================
// SIGNATURE VERIFICATION
// =============================================================================

struct SignatureParts {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_signature_header(header: &str) -> Result<SignatureParts, WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part
            .split_once('=')
            .ok_or(WebhookError::InvalidSignature)?;

        match key.trim() {
            "t" => timestamp = value.trim().parse().ok(),
            "v1" => {
                if let Ok(bytes) = hex::decode(value.trim()) {
                    signatures.push(bytes);
                }
            },
            _ => {},
        }
    }

    let timestamp = timestamp.ok_or(WebhookError::InvalidSignature)?;
    if signatures.is_empty() {
        return Err(WebhookError::InvalidSignature);
    }

    Ok(SignatureParts {
        timestamp,
        signatures,
    })
}

/// HMAC-SHA256 over `"{timestamp}.{payload}"`
pub fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let mut context = hmac::Context::with_key(&key);
    context.update(timestamp.to_string().as_bytes());
    context.update(b".");
    context.update(payload);
    context.sign().as_ref().to_vec()
}

/// Build a `Stripe-Signature` header value for a payload
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(compute_signature(secret, timestamp, payload))
    )
}

/// Verify the `Stripe-Signature` header and parse the event
pub fn verify_signature(
    payload: &[u8],
    header: Option<&str>,
    secret: &str,
    tolerance_seconds: i64,
    now: i64,
) -> Result<WebhookEvent, WebhookError> {
    let header = header
        .filter(|h| !h.trim().is_empty())
        .ok_or(WebhookError::MissingSignature)?;
    let parts = parse_signature_header(header)?;

    // abs_diff: `t` is attacker controlled and may sit anywhere in the i64 range
    if now.abs_diff(parts.timestamp) > tolerance_seconds.max(0).unsigned_abs() {
        return Err(WebhookError::TimestampOutOfTolerance);
    }

    let expected = compute_signature(secret, parts.timestamp, payload);
    let matched = parts
        .signatures
        .iter()
        .any(|candidate| bool::from(expected.as_slice().ct_eq(candidate.as_slice())));

    if !matched {
        return Err(WebhookError::InvalidSignature);
    }

    serde_json::from_slice(payload).map_err(|e| {
        warn!(error = %e, "Failed to parse webhook payload");
        WebhookError::InvalidPayload("malformed JSON payload".to_string())
    })
}

// =============================================================================
// PROCESSING
// =============================================================================

pub struct WebhookProcessor {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    catalog: Arc<PlanCatalog>,
}

impl WebhookProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        catalog: Arc<PlanCatalog>,
    ) -> Self {
        Self {
            store,
            gateway,
            catalog,
        }
    }

    /// Process a verified event once; duplicates are reported and skipped
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn handle_event(&self, event: &WebhookEvent) -> Result<WebhookOutcome, WebhookError> {
        if self.store.is_event_processed(&event.id).await? {
            debug!("Duplicate webhook delivery");
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        let object = &event.data.object;
        let outcome = match event.kind() {
            Some(EventType::CheckoutSessionCompleted)
            | Some(EventType::CheckoutSessionAsyncPaymentSucceeded) => {
                self.handle_checkout_completed(object).await?
            },
            Some(EventType::InvoicePaymentSucceeded) | Some(EventType::InvoicePaid) => {
                self.handle_invoice_paid(object).await?
            },
            Some(EventType::CustomerSubscriptionCreated)
            | Some(EventType::CustomerSubscriptionUpdated) => {
                self.handle_subscription_changed(false, object).await?
            },
            Some(EventType::CustomerSubscriptionDeleted) => {
                self.handle_subscription_changed(true, object).await?
            },
            _ => {
                debug!("Unhandled event type: {}", event.event_type);
                WebhookOutcome::Ignored
            },
        };

        if outcome != WebhookOutcome::Ignored {
            self.store
                .mark_event_processed(&event.id, &event.event_type)
                .await?;
        }

        Ok(outcome)
    }

    async fn handle_checkout_completed(
        &self,
        object: &serde_json::Value,
    ) -> Result<WebhookOutcome, WebhookError> {
        let session: CheckoutSessionObject = parse_object(object)?;
        let email = session
            .customer_details
            .as_ref()
            .and_then(|d| d.email.as_deref())
            .or(session.customer_email.as_deref());
        let customer_id = session.customer.as_ref().map(Expandable::id);

        let hints = UserHints {
            metadata_user_id: session.metadata.get("user_id").map(String::as_str),
            client_reference_id: session.client_reference_id.as_deref(),
            subscription_id: session.subscription.as_ref().map(Expandable::id),
            customer_id,
            email,
        };

        let Some(user_id) = self.resolve_user(&hints).await? else {
            warn!("No user found for checkout session {}", session.id);
            return Ok(WebhookOutcome::UserNotFound);
        };

        if let Some(customer_id) = customer_id {
            self.link_customer(user_id, email, customer_id).await?;
        }

        match session.mode.as_deref() {
            Some("subscription") => {
                let Some(subscription_id) = session.subscription.as_ref().map(Expandable::id)
                else {
                    warn!("Subscription checkout {} has no subscription", session.id);
                    return Ok(WebhookOutcome::Processed);
                };

                match self.gateway.retrieve_subscription(subscription_id).await? {
                    Some(subscription) => {
                        self.store_subscription(user_id, &subscription).await?;
                        info!("Subscription {} stored for user {}", subscription.id, user_id);
                    },
                    None => warn!("Subscription {} not found at Stripe", subscription_id),
                }
            },
            Some("payment") => {
                if session.payment_status.as_deref() != Some("paid") {
                    debug!("Checkout {} not paid yet", session.id);
                    return Ok(WebhookOutcome::Processed);
                }

                let grant =
                    CreditGrant::new(user_id, self.catalog.credits_per_pack(), session.id.clone());
                if self.store.grant_credits(&grant).await? {
                    info!(
                        "Granted {} credits to user {} for checkout {}",
                        grant.credits, user_id, session.id
                    );
                } else {
                    debug!("Credits for checkout {} already granted", session.id);
                }
            },
            other => debug!("Ignoring checkout mode {:?}", other),
        }

        Ok(WebhookOutcome::Processed)
    }

    async fn handle_invoice_paid(
        &self,
        object: &serde_json::Value,
    ) -> Result<WebhookOutcome, WebhookError> {
        let invoice: InvoiceObject = parse_object(object)?;
        let Some(subscription_id) = invoice.subscription.as_ref().map(Expandable::id) else {
            debug!("Invoice without subscription");
            return Ok(WebhookOutcome::Processed);
        };

        let Some(subscription) = self.gateway.retrieve_subscription(subscription_id).await?
        else {
            warn!("Subscription {} not found at Stripe", subscription_id);
            return Ok(WebhookOutcome::Processed);
        };

        let hints = UserHints {
            metadata_user_id: subscription.metadata.get("user_id").map(String::as_str),
            subscription_id: Some(subscription.id.as_str()),
            customer_id: invoice
                .customer
                .as_ref()
                .map(Expandable::id)
                .or(Some(subscription.customer.id())),
            email: invoice.customer_email.as_deref(),
            ..Default::default()
        };

        let Some(user_id) = self.resolve_user(&hints).await? else {
            warn!("No user found for subscription {}", subscription.id);
            return Ok(WebhookOutcome::UserNotFound);
        };

        self.store_subscription(user_id, &subscription).await?;
        info!("Subscription {} renewed for user {}", subscription.id, user_id);
        Ok(WebhookOutcome::Processed)
    }

    async fn handle_subscription_changed(
        &self,
        deleted: bool,
        object: &serde_json::Value,
    ) -> Result<WebhookOutcome, WebhookError> {
        let mut subscription: StripeSubscription = parse_object(object)?;

        if deleted {
            subscription.status = SubscriptionState::Canceled.as_str().to_string();
            if subscription.canceled_at.is_none() {
                subscription.canceled_at = Some(Utc::now().timestamp());
            }
        }

        let hints = UserHints {
            metadata_user_id: subscription.metadata.get("user_id").map(String::as_str),
            subscription_id: Some(subscription.id.as_str()),
            customer_id: Some(subscription.customer.id()),
            ..Default::default()
        };

        let Some(user_id) = self.resolve_user(&hints).await? else {
            warn!("No user found for subscription {}", subscription.id);
            return Ok(WebhookOutcome::UserNotFound);
        };

        self.store_subscription(user_id, &subscription).await?;
        info!(
            "Subscription {} is now {} for user {}",
            subscription.id, subscription.status, user_id
        );
        Ok(WebhookOutcome::Processed)
    }

    async fn store_subscription(
        &self,
        user_id: Uuid,
        subscription: &StripeSubscription,
    ) -> Result<(), WebhookError> {
        let record = subscription.to_record(user_id, &self.catalog);
        if !self.store.upsert_subscription(&record).await? {
            debug!("Subscription {} is terminal, update skipped", record.stripe_subscription_id);
        }
        Ok(())
    }

    /// Record the customer mapping unless the customer already belongs to someone
    async fn link_customer(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        customer_id: &str,
    ) -> Result<(), WebhookError> {
        match self.store.find_user_by_stripe_customer(customer_id).await? {
            None => {
                self.store
                    .set_stripe_customer_id(user_id, email, customer_id)
                    .await?
            },
            Some(owner) if owner != user_id => warn!(
                "Stripe customer {} already linked to another user",
                customer_id
            ),
            Some(_) => {},
        }
        Ok(())
    }

    /// metadata user_id, client_reference_id, local subscription owner,
    /// customer mapping, then email
    async fn resolve_user(&self, hints: &UserHints<'_>) -> Result<Option<Uuid>, WebhookError> {
        let direct = hints
            .metadata_user_id
            .into_iter()
            .chain(hints.client_reference_id)
            .find_map(|raw| Uuid::parse_str(raw.trim()).ok());
        if direct.is_some() {
            return Ok(direct);
        }

        if let Some(subscription_id) = hints.subscription_id {
            if let Some(existing) = self.store.find_subscription(subscription_id).await? {
                return Ok(Some(existing.user_id));
            }
        }

        if let Some(customer_id) = hints.customer_id {
            if let Some(user_id) = self.store.find_user_by_stripe_customer(customer_id).await? {
                return Ok(Some(user_id));
            }
        }

        let email = match (hints.email, hints.customer_id) {
            (Some(email), _) => Some(email.to_string()),
            (None, Some(customer_id)) => self
                .gateway
                .retrieve_customer(customer_id)
                .await?
                .and_then(|c| c.email),
            (None, None) => None,
        };

        match email {
            Some(email) => Ok(self.store.find_user_by_email(&email).await?),
            None => Ok(None),
        }
    }
}

fn parse_object<T: serde::de::DeserializeOwned>(
    object: &serde_json::Value,
) -> Result<T, WebhookError> {
    T::deserialize(object).map_err(|e| WebhookError::InvalidPayload(e.to_string()))
}
