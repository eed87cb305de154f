// In-memory store for tests and local development without PostgreSQL

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    may_replace, pick_current_subscription, BillingStore, StoreResult, StoryStore,
};
use crate::models::{
    BillingCustomer, ChargeSource, CreditGrant, CreditLot, NewUserStory, StoryPagination,
    SubscriptionRecord, SubscriptionState, UsageEvent, UsageStatus, UserStory, UserStoryRow,
};
use crate::services::entitlement::{
    month_start, EntitlementError, EntitlementPolicy, EntitlementSnapshot, Reservation,
};

#[derive(Default)]
struct MemoryState {
    customers: HashMap<Uuid, BillingCustomer>,
    subscriptions: HashMap<String, SubscriptionRecord>,
    credit_lots: Vec<CreditLot>,
    usage_events: Vec<UsageEvent>,
    stories: Vec<UserStoryRow>,
    processed_events: HashMap<String, DateTime<Utc>>,
}

impl MemoryState {
    fn ensure_customer(&mut self, user_id: Uuid, email: Option<&str>) -> &mut BillingCustomer {
        let now = Utc::now();
        let customer = self
            .customers
            .entry(user_id)
            .or_insert_with(|| BillingCustomer {
                user_id,
                email: None,
                stripe_customer_id: None,
                created_at: now,
                updated_at: now,
            });

        if let Some(email) = email {
            if customer.email.as_deref() != Some(email) {
                customer.email = Some(email.to_string());
                customer.updated_at = now;
            }
        }

        customer
    }

    fn count_usage(
        &self,
        user_id: Uuid,
        source: ChargeSource,
        since: Option<DateTime<Utc>>,
        pending_cutoff: DateTime<Utc>,
    ) -> i64 {
        self.usage_events
            .iter()
            .filter(|e| e.user_id == user_id && e.charge_source == source.as_str())
            .filter(|e| {
                e.status == UsageStatus::Committed.as_str() || e.created_at > pending_cutoff
            })
            .filter(|e| since.map_or(true, |since| e.created_at >= since))
            .count() as i64
    }

    fn snapshot(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        reservation_ttl: Duration,
    ) -> EntitlementSnapshot {
        let pending_cutoff = now - reservation_ttl;
        let subscriptions = self
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();

        EntitlementSnapshot {
            has_customer: self
                .customers
                .get(&user_id)
                .is_some_and(|c| c.stripe_customer_id.is_some()),
            subscription: pick_current_subscription(subscriptions, now),
            credits_granted: self
                .credit_lots
                .iter()
                .filter(|lot| lot.user_id == user_id)
                .map(|lot| lot.credits)
                .sum(),
            credits_used: self.count_usage(user_id, ChargeSource::Credit, None, pending_cutoff),
            free_used_this_month: self.count_usage(
                user_id,
                ChargeSource::FreeTier,
                Some(month_start(now)),
                pending_cutoff,
            ),
        }
    }
}

/// Store backed by process memory; shares state across clones
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All usage events, for assertions in tests
    pub async fn usage_events(&self) -> Vec<UsageEvent> {
        self.state.read().await.usage_events.clone()
    }

    /// All credit lots, for assertions in tests
    pub async fn credit_lots(&self) -> Vec<CreditLot> {
        self.state.read().await.credit_lots.clone()
    }

    /// Record a committed usage event at an arbitrary time (seeding past months in tests)
    pub async fn record_usage(
        &self,
        user_id: Uuid,
        charge_source: ChargeSource,
        created_at: DateTime<Utc>,
    ) {
        let mut state = self.state.write().await;
        state.ensure_customer(user_id, None);
        state.usage_events.push(UsageEvent {
            id: Uuid::new_v4(),
            user_id,
            charge_source: charge_source.as_str().to_string(),
            status: UsageStatus::Committed.as_str().to_string(),
            story_id: None,
            created_at,
            committed_at: Some(created_at),
        });
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn ensure_customer(
        &self,
        user_id: Uuid,
        email: Option<&str>,
    ) -> StoreResult<BillingCustomer> {
        let mut state = self.state.write().await;
        Ok(state.ensure_customer(user_id, email).clone())
    }

    async fn get_customer(&self, user_id: Uuid) -> StoreResult<Option<BillingCustomer>> {
        Ok(self.state.read().await.customers.get(&user_id).cloned())
    }

    async fn set_stripe_customer_id(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        stripe_customer_id: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let customer = state.ensure_customer(user_id, email);
        customer.stripe_customer_id = Some(stripe_customer_id.to_string());
        customer.updated_at = Utc::now();
        Ok(())
    }

    async fn find_user_by_stripe_customer(
        &self,
        stripe_customer_id: &str,
    ) -> StoreResult<Option<Uuid>> {
        Ok(self
            .state
            .read()
            .await
            .customers
            .values()
            .find(|c| c.stripe_customer_id.as_deref() == Some(stripe_customer_id))
            .map(|c| c.user_id))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<Uuid>> {
        Ok(self
            .state
            .read()
            .await
            .customers
            .values()
            .filter(|c| {
                c.email
                    .as_deref()
                    .is_some_and(|stored| stored.eq_ignore_ascii_case(email))
            })
            .max_by_key(|c| c.updated_at)
            .map(|c| c.user_id))
    }

    async fn list_subscriptions(&self, user_id: Uuid) -> StoreResult<Vec<SubscriptionRecord>> {
        let mut subscriptions: Vec<_> = self
            .state
            .read()
            .await
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| b.current_period_end.cmp(&a.current_period_end));
        Ok(subscriptions)
    }

    async fn upsert_subscription(&self, record: &SubscriptionRecord) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        state.ensure_customer(record.user_id, None);

        let mut stored = record.clone();
        if let Some(existing) = state.subscriptions.get(&record.stripe_subscription_id) {
            if !may_replace(existing, record) {
                return Ok(false);
            }
            stored.created_at = existing.created_at;
        }
        stored.updated_at = Utc::now();

        state
            .subscriptions
            .insert(stored.stripe_subscription_id.clone(), stored);
        Ok(true)
    }

    async fn find_subscription(
        &self,
        stripe_subscription_id: &str,
    ) -> StoreResult<Option<SubscriptionRecord>> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .get(stripe_subscription_id)
            .cloned())
    }

    async fn mark_subscription_canceled(
        &self,
        stripe_subscription_id: &str,
        canceled_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        match state.subscriptions.get_mut(stripe_subscription_id) {
            Some(subscription) => {
                subscription.status = SubscriptionState::Canceled.as_str().to_string();
                subscription.canceled_at = Some(canceled_at);
                subscription.updated_at = Utc::now();
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn grant_credits(&self, grant: &CreditGrant) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        if state
            .credit_lots
            .iter()
            .any(|lot| lot.source_ref == grant.source_ref)
        {
            return Ok(false);
        }

        state.ensure_customer(grant.user_id, None);
        state.credit_lots.push(CreditLot {
            id: grant.id,
            user_id: grant.user_id,
            credits: grant.credits,
            source_ref: grant.source_ref.clone(),
            granted_at: grant.granted_at,
        });
        Ok(true)
    }

    async fn snapshot(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        reservation_ttl: Duration,
    ) -> StoreResult<EntitlementSnapshot> {
        Ok(self.state.read().await.snapshot(user_id, now, reservation_ttl))
    }

    async fn reserve_generation(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        policy: &EntitlementPolicy,
        now: DateTime<Utc>,
        reservation_ttl: Duration,
    ) -> Result<Reservation, EntitlementError> {
        // The write lock plays the role of the customer row lock
        let mut state = self.state.write().await;
        state.ensure_customer(user_id, email);

        let decision = policy.evaluate(&state.snapshot(user_id, now, reservation_ttl), now);
        let Some(charge_source) = decision.charge_source else {
            return Err(EntitlementError::LimitReached(Box::new(decision)));
        };

        let reservation = Reservation {
            usage_event_id: Uuid::new_v4(),
            user_id,
            charge_source,
            created_at: now,
        };

        state.usage_events.push(UsageEvent {
            id: reservation.usage_event_id,
            user_id,
            charge_source: charge_source.as_str().to_string(),
            status: UsageStatus::Pending.as_str().to_string(),
            story_id: None,
            created_at: now,
            committed_at: None,
        });

        Ok(reservation)
    }

    async fn commit_generation(
        &self,
        reservation: &Reservation,
        story: NewUserStory,
    ) -> StoreResult<UserStory> {
        let row = UserStoryRow::from(story);
        let story = UserStory::try_from(row.clone())?;
        let now = Utc::now();

        let mut state = self.state.write().await;
        state.stories.push(row);

        let pending = state.usage_events.iter().position(|e| {
            e.id == reservation.usage_event_id && e.status == UsageStatus::Pending.as_str()
        });

        match pending {
            Some(index) => {
                let event = &mut state.usage_events[index];
                event.status = UsageStatus::Committed.as_str().to_string();
                event.story_id = Some(story.id);
                event.committed_at = Some(now);
            },
            None => state.usage_events.push(UsageEvent {
                id: Uuid::new_v4(),
                user_id: reservation.user_id,
                charge_source: reservation.charge_source.as_str().to_string(),
                status: UsageStatus::Committed.as_str().to_string(),
                story_id: Some(story.id),
                created_at: reservation.created_at,
                committed_at: Some(now),
            }),
        }

        Ok(story)
    }

    async fn release_generation(&self, reservation: &Reservation) -> StoreResult<()> {
        self.state.write().await.usage_events.retain(|e| {
            !(e.id == reservation.usage_event_id && e.status == UsageStatus::Pending.as_str())
        });
        Ok(())
    }

    async fn expire_reservations(&self, older_than: DateTime<Utc>) -> StoreResult<usize> {
        let mut state = self.state.write().await;
        let before = state.usage_events.len();
        state
            .usage_events
            .retain(|e| !(e.status == UsageStatus::Pending.as_str() && e.created_at < older_than));
        Ok(before - state.usage_events.len())
    }

    async fn is_event_processed(&self, event_id: &str) -> StoreResult<bool> {
        Ok(self
            .state
            .read()
            .await
            .processed_events
            .contains_key(event_id))
    }

    async fn mark_event_processed(&self, event_id: &str, _event_type: &str) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        if state.processed_events.contains_key(event_id) {
            return Ok(false);
        }
        state
            .processed_events
            .insert(event_id.to_string(), Utc::now());
        Ok(true)
    }

    async fn purge_processed_events(&self, older_than: DateTime<Utc>) -> StoreResult<usize> {
        let mut state = self.state.write().await;
        let before = state.processed_events.len();
        state
            .processed_events
            .retain(|_, processed_at| *processed_at >= older_than);
        Ok(before - state.processed_events.len())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl StoryStore for MemoryStore {
    async fn list_stories(
        &self,
        user_id: Uuid,
        pagination: &StoryPagination,
    ) -> StoreResult<(Vec<UserStory>, i64)> {
        let state = self.state.read().await;
        // Reversed first so equal timestamps still come out newest first
        let mut rows: Vec<&UserStoryRow> =
            state.stories.iter().rev().filter(|s| s.user_id == user_id).collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = rows.len() as i64;
        let stories = rows
            .into_iter()
            .skip(usize::try_from(pagination.offset()).unwrap_or(0))
            .take(usize::try_from(pagination.limit()).unwrap_or(0))
            .cloned()
            .map(UserStory::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((stories, total))
    }

    async fn get_story(&self, user_id: Uuid, story_id: Uuid) -> StoreResult<Option<UserStory>> {
        let state = self.state.read().await;
        let row = state
            .stories
            .iter()
            .find(|s| s.id == story_id && s.user_id == user_id)
            .cloned();
        Ok(row.map(UserStory::try_from).transpose()?)
    }

    async fn delete_story(&self, user_id: Uuid, story_id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let before = state.stories.len();
        state
            .stories
            .retain(|s| !(s.id == story_id && s.user_id == user_id));
        Ok(state.stories.len() < before)
    }

    async fn delete_all_stories(&self, user_id: Uuid) -> StoreResult<usize> {
        let mut state = self.state.write().await;
        let before = state.stories.len();
        state.stories.retain(|s| s.user_id != user_id);
        Ok(before - state.stories.len())
    }
}
