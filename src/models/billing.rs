// Billing ledger models: customers, subscriptions, credit lots, usage events

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::config::Plan;
use crate::schema::{
    billing_customers, credit_lots, processed_webhook_events, subscriptions, usage_events,
};

// =============================================================================
// CUSTOMERS
// =============================================================================

/// Mapping between a user and their Stripe customer
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = billing_customers)]
#[diesel(primary_key(user_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BillingCustomer {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = billing_customers)]
pub struct NewBillingCustomer {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub stripe_customer_id: Option<String>,
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

/// Stripe subscription statuses we care about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Paused,
}

impl SubscriptionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionState::Active => "active",
            SubscriptionState::Trialing => "trialing",
            SubscriptionState::PastDue => "past_due",
            SubscriptionState::Canceled => "canceled",
            SubscriptionState::Unpaid => "unpaid",
            SubscriptionState::Incomplete => "incomplete",
            SubscriptionState::IncompleteExpired => "incomplete_expired",
            SubscriptionState::Paused => "paused",
        }
    }

    /// Whether this status grants unlimited generation
    pub fn grants_access(&self) -> bool {
        matches!(self, SubscriptionState::Active | SubscriptionState::Trialing)
    }
}

impl FromStr for SubscriptionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionState::Active),
            "trialing" => Ok(SubscriptionState::Trialing),
            "past_due" => Ok(SubscriptionState::PastDue),
            "canceled" => Ok(SubscriptionState::Canceled),
            "unpaid" => Ok(SubscriptionState::Unpaid),
            "incomplete" => Ok(SubscriptionState::Incomplete),
            "incomplete_expired" => Ok(SubscriptionState::IncompleteExpired),
            "paused" => Ok(SubscriptionState::Paused),
            other => Err(format!("Unknown subscription status: {}", other)),
        }
    }
}

/// Local copy of a Stripe subscription, written by webhooks and reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = subscriptions)]
#[diesel(primary_key(stripe_subscription_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SubscriptionRecord {
    pub stripe_subscription_id: String,
    pub user_id: Uuid,
    pub stripe_customer_id: String,
    pub plan: String,
    pub status: String,
    pub price_id: Option<String>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    pub fn state(&self) -> Option<SubscriptionState> {
        self.status.parse().ok()
    }

    pub fn plan(&self) -> Option<Plan> {
        self.plan.parse().ok()
    }

    /// Active means an entitling status and a period that has not ended
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.state().is_some_and(|s| s.grants_access()) && self.current_period_end > now
    }
}

// =============================================================================
// CREDIT LOTS
// =============================================================================

/// Credits granted by a one-time purchase
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = credit_lots)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreditLot {
    pub id: Uuid,
    pub user_id: Uuid,
    pub credits: i64,
    pub source_ref: String,
    pub granted_at: DateTime<Utc>,
}

/// A credit grant; `source_ref` (the checkout session id) makes grants idempotent
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = credit_lots)]
pub struct CreditGrant {
    pub id: Uuid,
    pub user_id: Uuid,
    pub credits: i64,
    pub source_ref: String,
    pub granted_at: DateTime<Utc>,
}

impl CreditGrant {
    pub fn new(user_id: Uuid, credits: i64, source_ref: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            credits,
            source_ref: source_ref.into(),
            granted_at: Utc::now(),
        }
    }
}

// =============================================================================
// USAGE EVENTS
// =============================================================================

/// What a generation was charged against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeSource {
    Subscription,
    FreeTier,
    Credit,
}

impl ChargeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeSource::Subscription => "subscription",
            ChargeSource::FreeTier => "free_tier",
            ChargeSource::Credit => "credit",
        }
    }
}

impl FromStr for ChargeSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscription" => Ok(ChargeSource::Subscription),
            "free_tier" => Ok(ChargeSource::FreeTier),
            "credit" => Ok(ChargeSource::Credit),
            other => Err(format!("Unknown charge source: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    Pending,
    Committed,
}

impl UsageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageStatus::Pending => "pending",
            UsageStatus::Committed => "committed",
        }
    }
}

/// One generation charged to a user
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = usage_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UsageEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub charge_source: String,
    pub status: String,
    pub story_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = usage_events)]
pub struct NewUsageEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub charge_source: String,
    pub status: String,
    pub story_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
}

// =============================================================================
// WEBHOOK EVENTS
// =============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = processed_webhook_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProcessedWebhookEvent {
    pub event_id: String,
    pub event_type: String,
    pub processed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(status: &str, period_end: DateTime<Utc>) -> SubscriptionRecord {
        let now = Utc::now();
        SubscriptionRecord {
            stripe_subscription_id: "sub_1".to_string(),
            user_id: Uuid::new_v4(),
            stripe_customer_id: "cus_1".to_string(),
            plan: "monthly".to_string(),
            status: status.to_string(),
            price_id: Some("price_month".to_string()),
            current_period_start: now - Duration::days(1),
            current_period_end: period_end,
            cancel_at_period_end: false,
            canceled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_subscription_active_requires_status_and_period() {
        let now = Utc::now();
        assert!(record("active", now + Duration::days(3)).is_active(now));
        assert!(record("trialing", now + Duration::days(3)).is_active(now));
        assert!(!record("past_due", now + Duration::days(3)).is_active(now));
        assert!(!record("active", now - Duration::seconds(1)).is_active(now));
        assert!(!record("bogus", now + Duration::days(3)).is_active(now));
    }

    #[test]
    fn test_charge_source_round_trip_names() {
        for source in [
            ChargeSource::Subscription,
            ChargeSource::FreeTier,
            ChargeSource::Credit,
        ] {
            assert_eq!(source.as_str().parse::<ChargeSource>(), Ok(source));
        }
        assert!("bonus".parse::<ChargeSource>().is_err());
    }

    #[test]
    fn test_plan_parsed_from_record() {
        let now = Utc::now();
        assert_eq!(record("active", now).plan(), Some(Plan::Monthly));
    }
}
