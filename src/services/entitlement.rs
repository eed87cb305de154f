// Entitlement policy: decides whether a user may generate another story
// and what the generation is charged against

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app_config::EntitlementConfig;
use crate::models::{ChargeSource, SubscriptionRecord};
use crate::services::store::StoreError;

#[derive(Debug, Error)]
pub enum EntitlementError {
    #[error("Generation limit reached")]
    LimitReached(Box<EntitlementDecision>),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<diesel::result::Error> for EntitlementError {
    fn from(error: diesel::result::Error) -> Self {
        EntitlementError::Store(StoreError::from(error))
    }
}

/// Ledger totals for one user at one point in time
#[derive(Debug, Clone, Default)]
pub struct EntitlementSnapshot {
    /// Whether the user has a customer record at the payment processor
    pub has_customer: bool,
    pub subscription: Option<SubscriptionRecord>,
    pub credits_granted: i64,
    pub credits_used: i64,
    pub free_used_this_month: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Subscribed,
    NotSubscribed,
    NoSubscription,
}

/// Outcome of evaluating a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct EntitlementDecision {
    pub status: SubscriptionStatus,
    pub has_active_subscription: bool,
    pub remaining_credits: i64,
    pub free_used: i64,
    pub free_limit: i64,
    pub remaining_free: i64,
    pub charge_source: Option<ChargeSource>,
    pub subscription: Option<SubscriptionRecord>,
}

impl EntitlementDecision {
    pub fn can_generate(&self) -> bool {
        self.charge_source.is_some()
    }
}

/// A pending usage event held while the generator runs
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub usage_event_id: Uuid,
    pub user_id: Uuid,
    pub charge_source: ChargeSource,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct EntitlementPolicy {
    pub free_monthly_limit: i64,
    pub credits_per_pack: i64,
}

impl Default for EntitlementPolicy {
    fn default() -> Self {
        Self {
            free_monthly_limit: 5,
            credits_per_pack: 30,
        }
    }
}

impl From<&EntitlementConfig> for EntitlementPolicy {
    fn from(config: &EntitlementConfig) -> Self {
        Self {
            free_monthly_limit: config.free_monthly_limit,
            credits_per_pack: config.credits_per_pack,
        }
    }
}

impl EntitlementPolicy {
    /// Subscription first, then the monthly free allowance, then purchased credits
    pub fn evaluate(&self, snapshot: &EntitlementSnapshot, now: DateTime<Utc>) -> EntitlementDecision {
        let active_subscription = snapshot
            .subscription
            .as_ref()
            .filter(|s| s.is_active(now))
            .cloned();
        let has_active_subscription = active_subscription.is_some();

        let remaining_credits = (snapshot.credits_granted - snapshot.credits_used).max(0);
        let remaining_free = (self.free_monthly_limit - snapshot.free_used_this_month).max(0);

        let charge_source = if has_active_subscription {
            Some(ChargeSource::Subscription)
        } else if remaining_free > 0 {
            Some(ChargeSource::FreeTier)
        } else if remaining_credits > 0 {
            Some(ChargeSource::Credit)
        } else {
            None
        };

        let status = if has_active_subscription {
            SubscriptionStatus::Subscribed
        } else if snapshot.has_customer {
            SubscriptionStatus::NotSubscribed
        } else {
            SubscriptionStatus::NoSubscription
        };

        EntitlementDecision {
            status,
            has_active_subscription,
            remaining_credits,
            free_used: snapshot.free_used_this_month,
            free_limit: self.free_monthly_limit,
            remaining_free,
            charge_source,
            subscription: active_subscription.or_else(|| snapshot.subscription.clone()),
        }
    }
}

/// First instant of `now`'s calendar month in UTC
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|start| start.and_utc())
        .unwrap_or(now)
}

// =============================================================================
// STATUS DOCUMENT
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSummary {
    pub plan: String,
    pub status: String,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
}

/// Entitlement status returned to clients
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "status": "not_subscribed",
    "hasActiveSubscription": false,
    "remainingOneTimeCredits": 12,
    "freeGenerationsUsed": 5,
    "freeGenerationsLimit": 5,
    "remainingFreeGenerations": 0,
    "canGenerate": true,
    "subscription": null
}))]
pub struct BillingStatusResponse {
    pub status: SubscriptionStatus,
    pub has_active_subscription: bool,
    pub remaining_one_time_credits: i64,
    pub free_generations_used: i64,
    pub free_generations_limit: i64,
    pub remaining_free_generations: i64,
    pub can_generate: bool,
    pub subscription: Option<SubscriptionSummary>,
}

impl From<&EntitlementDecision> for BillingStatusResponse {
    fn from(decision: &EntitlementDecision) -> Self {
        Self {
            status: decision.status,
            has_active_subscription: decision.has_active_subscription,
            remaining_one_time_credits: decision.remaining_credits,
            free_generations_used: decision.free_used,
            free_generations_limit: decision.free_limit,
            remaining_free_generations: decision.remaining_free,
            can_generate: decision.can_generate(),
            subscription: decision.subscription.as_ref().map(|s| SubscriptionSummary {
                plan: s.plan.clone(),
                status: s.status.clone(),
                current_period_end: s.current_period_end,
                cancel_at_period_end: s.cancel_at_period_end,
            }),
        }
    }
}
