// Billing flows: entitlement status, reconciliation with Stripe, checkout and portal

use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{Plan, PlanCatalog, PlanError};
use crate::services::entitlement::{EntitlementDecision, EntitlementPolicy};
use crate::services::store::{Store, StoreError};
use crate::services::stripe::{CheckoutRequest, CheckoutSession, PaymentError, PaymentGateway};

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("User email not found")]
    MissingEmail,

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("An active subscription for this plan already exists")]
    AlreadySubscribed,

    #[error("No billing account found")]
    NoCustomer,

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct BillingService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    catalog: Arc<PlanCatalog>,
    policy: EntitlementPolicy,
    reservation_ttl: Duration,
}

impl BillingService {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        catalog: Arc<PlanCatalog>,
        policy: EntitlementPolicy,
        reservation_ttl: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            catalog,
            policy,
            reservation_ttl,
        }
    }

    /// Entitlement decision from the local ledger only
    #[instrument(skip(self, email))]
    pub async fn status(
        &self,
        user_id: Uuid,
        email: Option<&str>,
    ) -> Result<EntitlementDecision, BillingError> {
        // Remember the email so webhooks can fall back to it
        if email.is_some() {
            self.store.ensure_customer(user_id, email).await?;
        }

        let now = Utc::now();
        let snapshot = self
            .store
            .snapshot(user_id, now, self.reservation_ttl)
            .await?;
        Ok(self.policy.evaluate(&snapshot, now))
    }

    /// Pull the caller's subscriptions from Stripe into the ledger
    #[instrument(skip(self, email))]
    pub async fn sync(
        &self,
        user_id: Uuid,
        email: Option<&str>,
    ) -> Result<EntitlementDecision, BillingError> {
        let Some(customer_id) = self.find_customer(user_id, email).await? else {
            debug!("No Stripe customer for user {}, nothing to sync", user_id);
            return self.status(user_id, email).await;
        };

        let remote = self.gateway.list_subscriptions(&customer_id, None).await?;
        let mut seen = HashSet::new();
        for subscription in &remote {
            seen.insert(subscription.id.clone());
            let record = subscription.to_record(user_id, &self.catalog);
            self.store.upsert_subscription(&record).await?;
        }

        // Anything Stripe did not list is checked one by one
        let now = Utc::now();
        for local in self.store.list_subscriptions(user_id).await? {
            if seen.contains(&local.stripe_subscription_id) || !local.is_active(now) {
                continue;
            }

            match self
                .gateway
                .retrieve_subscription(&local.stripe_subscription_id)
                .await?
            {
                Some(subscription) => {
                    let record = subscription.to_record(user_id, &self.catalog);
                    self.store.upsert_subscription(&record).await?;
                },
                None => {
                    warn!(
                        "Subscription {} no longer exists at Stripe, marking canceled",
                        local.stripe_subscription_id
                    );
                    self.store
                        .mark_subscription_canceled(&local.stripe_subscription_id, now)
                        .await?;
                },
            }
        }

        info!("Synced {} Stripe subscriptions for user {}", remote.len(), user_id);
        self.status(user_id, email).await
    }

    /// Start a Stripe Checkout for a plan
    #[instrument(skip(self, email, origin))]
    pub async fn create_checkout(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        plan: Plan,
        origin: &str,
    ) -> Result<CheckoutSession, BillingError> {
        let email = email
            .filter(|e| !e.trim().is_empty())
            .ok_or(BillingError::MissingEmail)?;
        let price_id = self.catalog.price_for(plan)?.to_string();
        let customer_id = self.get_or_create_customer(user_id, email).await?;

        if plan.is_recurring() {
            self.ensure_not_subscribed(user_id, &customer_id, &price_id)
                .await?;
        }

        let origin = origin.trim_end_matches('/');
        let request = CheckoutRequest {
            mode: plan.checkout_mode(),
            price_id,
            customer_id,
            user_id,
            plan,
            success_url: format!("{}/?checkout=success", origin),
            cancel_url: format!("{}/subscription?checkout=cancel", origin),
        };

        let session = self.gateway.create_checkout_session(&request).await?;
        info!("Created {} checkout session {} for user {}", plan, session.id, user_id);
        Ok(session)
    }

    /// Billing portal URL for the caller's Stripe customer
    #[instrument(skip(self, return_url))]
    pub async fn create_portal(
        &self,
        user_id: Uuid,
        return_url: &str,
    ) -> Result<String, BillingError> {
        let customer_id = self
            .store
            .get_customer(user_id)
            .await?
            .and_then(|c| c.stripe_customer_id)
            .ok_or(BillingError::NoCustomer)?;

        Ok(self
            .gateway
            .create_portal_session(&customer_id, return_url)
            .await?)
    }

    /// Stored customer id, else an unclaimed Stripe customer with the same email
    async fn find_customer(
        &self,
        user_id: Uuid,
        email: Option<&str>,
    ) -> Result<Option<String>, BillingError> {
        let stored = self
            .store
            .get_customer(user_id)
            .await?
            .and_then(|c| c.stripe_customer_id);
        if stored.is_some() {
            return Ok(stored);
        }

        let Some(email) = email else {
            return Ok(None);
        };

        let Some(customer) = self.gateway.find_customer_by_email(email).await? else {
            return Ok(None);
        };

        // Another account shares the email; its customer and subscriptions stay with it
        if !self.link_customer(user_id, Some(email), &customer.id).await? {
            return Ok(None);
        }
        Ok(Some(customer.id))
    }

    async fn get_or_create_customer(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> Result<String, BillingError> {
        self.store.ensure_customer(user_id, Some(email)).await?;

        if let Some(customer_id) = self.find_customer(user_id, Some(email)).await? {
            return Ok(customer_id);
        }

        let customer = self.gateway.create_customer(email, user_id).await?;
        info!("Created Stripe customer {} for user {}", customer.id, user_id);
        self.link_customer(user_id, Some(email), &customer.id).await?;
        Ok(customer.id)
    }

    /// False when the customer is already linked to another user
    async fn link_customer(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        customer_id: &str,
    ) -> Result<bool, BillingError> {
        match self.store.find_user_by_stripe_customer(customer_id).await? {
            Some(owner) if owner != user_id => {
                warn!("Stripe customer {} belongs to another user", customer_id);
                Ok(false)
            },
            _ => {
                self.store
                    .set_stripe_customer_id(user_id, email, customer_id)
                    .await?;
                Ok(true)
            },
        }
    }

    /// Reject a second subscription to the same price, checking the ledger then Stripe
    async fn ensure_not_subscribed(
        &self,
        user_id: Uuid,
        customer_id: &str,
        price_id: &str,
    ) -> Result<(), BillingError> {
        let now = Utc::now();
        let local = self.store.list_subscriptions(user_id).await?;
        if local
            .iter()
            .any(|s| s.is_active(now) && s.price_id.as_deref() == Some(price_id))
        {
            return Err(BillingError::AlreadySubscribed);
        }

        let remote = self
            .gateway
            .list_active_subscriptions(customer_id, Some(price_id))
            .await?;
        if remote.is_empty() {
            return Ok(());
        }

        // Stripe knows about it but the ledger missed the webhook
        for subscription in &remote {
            let record = subscription.to_record(user_id, &self.catalog);
            self.store.upsert_subscription(&record).await?;
        }
        Err(BillingError::AlreadySubscribed)
    }
}

/// Checkout redirect base: the request Origin when it is an http(s) URL, else the frontend URL
pub fn resolve_origin(origin_header: Option<&str>, frontend_url: &str) -> String {
    origin_header
        .and_then(|raw| url::Url::parse(raw.trim()).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
        .map(|url| url.origin().ascii_serialization())
        .unwrap_or_else(|| frontend_url.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_origin() {
        assert_eq!(
            resolve_origin(Some("https://app.example.com"), "http://localhost:3000"),
            "https://app.example.com"
        );
        assert_eq!(
            resolve_origin(Some("https://app.example.com/some/path"), "http://localhost:3000"),
            "https://app.example.com"
        );
        assert_eq!(
            resolve_origin(Some("null"), "http://localhost:3000/"),
            "http://localhost:3000"
        );
        assert_eq!(
            resolve_origin(Some("javascript:alert(1)"), "http://localhost:3000"),
            "http://localhost:3000"
        );
        assert_eq!(resolve_origin(None, "https://storygen.app"), "https://storygen.app");
    }
}
