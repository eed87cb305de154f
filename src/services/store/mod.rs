// Persistence seams for the billing ledger and story history

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    BillingCustomer, CreditGrant, NewUserStory, StoryPagination, SubscriptionRecord,
    SubscriptionState, UserStory,
};
use crate::services::entitlement::{
    EntitlementError, EntitlementPolicy, EntitlementSnapshot, Reservation,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<diesel::result::Error> for StoreError {
    fn from(error: diesel::result::Error) -> Self {
        StoreError::Database(error.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Serialization(error.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Billing ledger: customers, subscriptions, credits, usage and webhook bookkeeping
#[async_trait]
pub trait BillingStore: Send + Sync {
    // Customers

    /// Create the customer row if missing; refreshes the email when one is given
    async fn ensure_customer(&self, user_id: Uuid, email: Option<&str>)
        -> StoreResult<BillingCustomer>;

    async fn get_customer(&self, user_id: Uuid) -> StoreResult<Option<BillingCustomer>>;

    async fn set_stripe_customer_id(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        stripe_customer_id: &str,
    ) -> StoreResult<()>;

    async fn find_user_by_stripe_customer(&self, stripe_customer_id: &str)
        -> StoreResult<Option<Uuid>>;

    /// Case-insensitive lookup by email
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<Uuid>>;

    // Subscriptions

    async fn list_subscriptions(&self, user_id: Uuid) -> StoreResult<Vec<SubscriptionRecord>>;

    /// Most relevant subscription: active ones first, then the latest period end
    async fn current_subscription(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<SubscriptionRecord>> {
        let subscriptions = self.list_subscriptions(user_id).await?;
        Ok(pick_current_subscription(subscriptions, now))
    }

    /// Insert or update by Stripe subscription id. Returns false when the
    /// stored row is terminal and the incoming one would revive it.
    async fn upsert_subscription(&self, record: &SubscriptionRecord) -> StoreResult<bool>;

    async fn find_subscription(&self, stripe_subscription_id: &str)
        -> StoreResult<Option<SubscriptionRecord>>;

    async fn mark_subscription_canceled(
        &self,
        stripe_subscription_id: &str,
        canceled_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    // Credits and usage

    /// Returns false when the grant's `source_ref` was already used
    async fn grant_credits(&self, grant: &CreditGrant) -> StoreResult<bool>;

    async fn snapshot(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        reservation_ttl: Duration,
    ) -> StoreResult<EntitlementSnapshot>;

    /// Atomically evaluate the policy and record a pending usage event
    async fn reserve_generation(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        policy: &EntitlementPolicy,
        now: DateTime<Utc>,
        reservation_ttl: Duration,
    ) -> Result<Reservation, EntitlementError>;

    /// Store the story and turn the reservation into committed usage
    async fn commit_generation(
        &self,
        reservation: &Reservation,
        story: NewUserStory,
    ) -> StoreResult<UserStory>;

    async fn release_generation(&self, reservation: &Reservation) -> StoreResult<()>;

    /// Delete pending usage events created before `older_than`
    async fn expire_reservations(&self, older_than: DateTime<Utc>) -> StoreResult<usize>;

    // Webhook idempotency

    async fn is_event_processed(&self, event_id: &str) -> StoreResult<bool>;

    /// Returns false when the event id was already recorded
    async fn mark_event_processed(&self, event_id: &str, event_type: &str) -> StoreResult<bool>;

    async fn purge_processed_events(&self, older_than: DateTime<Utc>) -> StoreResult<usize>;

    async fn health_check(&self) -> StoreResult<()>;
}

/// Story history
#[async_trait]
pub trait StoryStore: Send + Sync {
    /// Newest first, with the total count
    async fn list_stories(
        &self,
        user_id: Uuid,
        pagination: &StoryPagination,
    ) -> StoreResult<(Vec<UserStory>, i64)>;

    async fn get_story(&self, user_id: Uuid, story_id: Uuid) -> StoreResult<Option<UserStory>>;

    async fn delete_story(&self, user_id: Uuid, story_id: Uuid) -> StoreResult<bool>;

    async fn delete_all_stories(&self, user_id: Uuid) -> StoreResult<usize>;
}

/// Everything the application persists
pub trait Store: BillingStore + StoryStore {}

impl<T: BillingStore + StoryStore> Store for T {}

pub(crate) fn pick_current_subscription(
    subscriptions: Vec<SubscriptionRecord>,
    now: DateTime<Utc>,
) -> Option<SubscriptionRecord> {
    subscriptions
        .into_iter()
        .max_by_key(|s| (s.is_active(now), s.current_period_end))
}

/// Canceled and expired subscriptions never come back to life at Stripe
pub(crate) fn is_terminal(record: &SubscriptionRecord) -> bool {
    matches!(
        record.state(),
        Some(SubscriptionState::Canceled) | Some(SubscriptionState::IncompleteExpired)
    )
}

pub(crate) fn may_replace(existing: &SubscriptionRecord, incoming: &SubscriptionRecord) -> bool {
    !is_terminal(existing) || is_terminal(incoming)
}
