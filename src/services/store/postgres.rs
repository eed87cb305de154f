// PostgreSQL store on the shared diesel-async pool

use async_trait::async_trait;
use bb8::PooledConnection;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    may_replace, pick_current_subscription, BillingStore, StoreError, StoreResult, StoryStore,
};
use crate::db::DieselPool;
use crate::models::{
    BillingCustomer, ChargeSource, CreditGrant, NewBillingCustomer, NewUsageEvent, NewUserStory,
    ProcessedWebhookEvent, StoryPagination, SubscriptionRecord, SubscriptionState, UsageStatus,
    UserStory, UserStoryRow,
};
use crate::schema::{
    billing_customers, credit_lots, processed_webhook_events, subscriptions, usage_events,
    user_stories,
};
use crate::services::entitlement::{
    month_start, EntitlementError, EntitlementPolicy, EntitlementSnapshot, Reservation,
};

diesel::define_sql_function!(fn lower(x: diesel::sql_types::Nullable<diesel::sql_types::Text>) -> diesel::sql_types::Nullable<diesel::sql_types::Text>);

type PgConnection<'a> = PooledConnection<'a, AsyncDieselConnectionManager<AsyncPgConnection>>;

#[derive(Clone)]
pub struct PgStore {
    pool: Arc<DieselPool>,
}

impl PgStore {
    pub fn new(pool: Arc<DieselPool>) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> StoreResult<PgConnection<'_>> {
        self.pool.get().await.map_err(|e| {
            warn!("Failed to get database connection: {}", e);
            StoreError::Pool(e.to_string())
        })
    }
}

/// Insert the customer row for `user_id` when it does not exist yet
async fn insert_customer_if_missing(
    conn: &mut AsyncPgConnection,
    user_id: Uuid,
    email: Option<String>,
) -> Result<(), diesel::result::Error> {
    diesel::insert_into(billing_customers::table)
        .values(NewBillingCustomer {
            user_id,
            email,
            stripe_customer_id: None,
        })
        .on_conflict(billing_customers::user_id)
        .do_nothing()
        .execute(conn)
        .await?;
    Ok(())
}

/// Count usage that still holds an allowance: committed rows, plus pending
/// rows younger than the reservation TTL
async fn count_usage(
    conn: &mut AsyncPgConnection,
    user_id: Uuid,
    source: ChargeSource,
    since: Option<DateTime<Utc>>,
    pending_cutoff: DateTime<Utc>,
) -> Result<i64, diesel::result::Error> {
    let mut query = usage_events::table
        .filter(usage_events::user_id.eq(user_id))
        .filter(usage_events::charge_source.eq(source.as_str()))
        .filter(
            usage_events::status
                .eq(UsageStatus::Committed.as_str())
                .or(usage_events::created_at.gt(pending_cutoff)),
        )
        .into_boxed();

    if let Some(since) = since {
        query = query.filter(usage_events::created_at.ge(since));
    }

    query.count().get_result(conn).await
}

async fn load_snapshot(
    conn: &mut AsyncPgConnection,
    user_id: Uuid,
    now: DateTime<Utc>,
    reservation_ttl: Duration,
) -> Result<EntitlementSnapshot, diesel::result::Error> {
    let customer = billing_customers::table
        .find(user_id)
        .select(BillingCustomer::as_select())
        .first(conn)
        .await
        .optional()?;

    let subscriptions = subscriptions::table
        .filter(subscriptions::user_id.eq(user_id))
        .select(SubscriptionRecord::as_select())
        .load(conn)
        .await?;

    let lots: Vec<i64> = credit_lots::table
        .filter(credit_lots::user_id.eq(user_id))
        .select(credit_lots::credits)
        .load(conn)
        .await?;

    let pending_cutoff = now - reservation_ttl;
    let credits_used = count_usage(conn, user_id, ChargeSource::Credit, None, pending_cutoff).await?;
    let free_used_this_month = count_usage(
        conn,
        user_id,
        ChargeSource::FreeTier,
        Some(month_start(now)),
        pending_cutoff,
    )
    .await?;

    Ok(EntitlementSnapshot {
        has_customer: customer.is_some_and(|c| c.stripe_customer_id.is_some()),
        subscription: pick_current_subscription(subscriptions, now),
        credits_granted: lots.iter().sum(),
        credits_used,
        free_used_this_month,
    })
}

#[async_trait]
impl BillingStore for PgStore {
    async fn ensure_customer(
        &self,
        user_id: Uuid,
        email: Option<&str>,
    ) -> StoreResult<BillingCustomer> {
        let mut conn = self.conn().await?;

        insert_customer_if_missing(&mut conn, user_id, email.map(str::to_string)).await?;

        if let Some(email) = email {
            diesel::update(billing_customers::table.find(user_id))
                .filter(
                    billing_customers::email
                        .is_null()
                        .or(billing_customers::email.ne(email)),
                )
                .set((
                    billing_customers::email.eq(email),
                    billing_customers::updated_at.eq(Utc::now()),
                ))
                .execute(&mut conn)
                .await?;
        }

        Ok(billing_customers::table
            .find(user_id)
            .select(BillingCustomer::as_select())
            .first(&mut conn)
            .await?)
    }

    async fn get_customer(&self, user_id: Uuid) -> StoreResult<Option<BillingCustomer>> {
        let mut conn = self.conn().await?;
        Ok(billing_customers::table
            .find(user_id)
            .select(BillingCustomer::as_select())
            .first(&mut conn)
            .await
            .optional()?)
    }

    async fn set_stripe_customer_id(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        stripe_customer_id: &str,
    ) -> StoreResult<()> {
        let mut conn = self.conn().await?;

        diesel::insert_into(billing_customers::table)
            .values(NewBillingCustomer {
                user_id,
                email: email.map(str::to_string),
                stripe_customer_id: Some(stripe_customer_id.to_string()),
            })
            .on_conflict(billing_customers::user_id)
            .do_update()
            .set((
                billing_customers::stripe_customer_id.eq(stripe_customer_id),
                billing_customers::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;

        debug!("Linked user {} to Stripe customer {}", user_id, stripe_customer_id);
        Ok(())
    }

    async fn find_user_by_stripe_customer(
        &self,
        stripe_customer_id: &str,
    ) -> StoreResult<Option<Uuid>> {
        let mut conn = self.conn().await?;
        Ok(billing_customers::table
            .filter(billing_customers::stripe_customer_id.eq(stripe_customer_id))
            .select(billing_customers::user_id)
            .first(&mut conn)
            .await
            .optional()?)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<Uuid>> {
        let mut conn = self.conn().await?;
        Ok(billing_customers::table
            .filter(lower(billing_customers::email).eq(email.to_lowercase()))
            .order(billing_customers::updated_at.desc())
            .select(billing_customers::user_id)
            .first(&mut conn)
            .await
            .optional()?)
    }

    async fn list_subscriptions(&self, user_id: Uuid) -> StoreResult<Vec<SubscriptionRecord>> {
        let mut conn = self.conn().await?;
        Ok(subscriptions::table
            .filter(subscriptions::user_id.eq(user_id))
            .order(subscriptions::current_period_end.desc())
            .select(SubscriptionRecord::as_select())
            .load(&mut conn)
            .await?)
    }

    #[instrument(skip(self, record), fields(subscription = %record.stripe_subscription_id))]
    async fn upsert_subscription(&self, record: &SubscriptionRecord) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let record = record.clone();

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                insert_customer_if_missing(conn, record.user_id, None).await?;

                let existing = subscriptions::table
                    .find(&record.stripe_subscription_id)
                    .select(SubscriptionRecord::as_select())
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?;

                if let Some(existing) = &existing {
                    if !may_replace(existing, &record) {
                        debug!("Ignoring update for terminal subscription");
                        return Ok(false);
                    }
                }

                diesel::insert_into(subscriptions::table)
                    .values(&record)
                    .on_conflict(subscriptions::stripe_subscription_id)
                    .do_update()
                    .set((
                        subscriptions::user_id.eq(excluded(subscriptions::user_id)),
                        subscriptions::stripe_customer_id
                            .eq(excluded(subscriptions::stripe_customer_id)),
                        subscriptions::plan.eq(excluded(subscriptions::plan)),
                        subscriptions::status.eq(excluded(subscriptions::status)),
                        subscriptions::price_id.eq(excluded(subscriptions::price_id)),
                        subscriptions::current_period_start
                            .eq(excluded(subscriptions::current_period_start)),
                        subscriptions::current_period_end
                            .eq(excluded(subscriptions::current_period_end)),
                        subscriptions::cancel_at_period_end
                            .eq(excluded(subscriptions::cancel_at_period_end)),
                        subscriptions::canceled_at.eq(excluded(subscriptions::canceled_at)),
                        subscriptions::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)
                    .await?;

                Ok(true)
            })
        })
        .await
    }

    async fn find_subscription(
        &self,
        stripe_subscription_id: &str,
    ) -> StoreResult<Option<SubscriptionRecord>> {
        let mut conn = self.conn().await?;
        Ok(subscriptions::table
            .find(stripe_subscription_id)
            .select(SubscriptionRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?)
    }

    async fn mark_subscription_canceled(
        &self,
        stripe_subscription_id: &str,
        canceled_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(subscriptions::table.find(stripe_subscription_id))
            .set((
                subscriptions::status.eq(SubscriptionState::Canceled.as_str()),
                subscriptions::canceled_at.eq(Some(canceled_at)),
                subscriptions::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(updated > 0)
    }

    async fn grant_credits(&self, grant: &CreditGrant) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let grant = grant.clone();

        conn.transaction::<_, StoreError, _>(|conn| {
            Box::pin(async move {
                insert_customer_if_missing(conn, grant.user_id, None).await?;

                let inserted = diesel::insert_into(credit_lots::table)
                    .values(&grant)
                    .on_conflict(credit_lots::source_ref)
                    .do_nothing()
                    .execute(conn)
                    .await?;

                Ok(inserted == 1)
            })
        })
        .await
    }

    async fn snapshot(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        reservation_ttl: Duration,
    ) -> StoreResult<EntitlementSnapshot> {
        let mut conn = self.conn().await?;
        Ok(load_snapshot(&mut conn, user_id, now, reservation_ttl).await?)
    }

    #[instrument(skip(self, email, policy))]
    async fn reserve_generation(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        policy: &EntitlementPolicy,
        now: DateTime<Utc>,
        reservation_ttl: Duration,
    ) -> Result<Reservation, EntitlementError> {
        let mut conn = self.conn().await?;
        let email = email.map(str::to_string);
        let policy = *policy;

        conn.transaction::<_, EntitlementError, _>(|conn| {
            Box::pin(async move {
                insert_customer_if_missing(conn, user_id, email).await?;

                // Row lock serializes concurrent reservations for one user
                billing_customers::table
                    .find(user_id)
                    .select(billing_customers::user_id)
                    .for_update()
                    .first::<Uuid>(conn)
                    .await?;

                let snapshot = load_snapshot(conn, user_id, now, reservation_ttl).await?;
                let decision = policy.evaluate(&snapshot, now);

                let Some(charge_source) = decision.charge_source else {
                    return Err(EntitlementError::LimitReached(Box::new(decision)));
                };

                let reservation = Reservation {
                    usage_event_id: Uuid::new_v4(),
                    user_id,
                    charge_source,
                    created_at: now,
                };

                diesel::insert_into(usage_events::table)
                    .values(NewUsageEvent {
                        id: reservation.usage_event_id,
                        user_id,
                        charge_source: charge_source.as_str().to_string(),
                        status: UsageStatus::Pending.as_str().to_string(),
                        story_id: None,
                        created_at: now,
                        committed_at: None,
                    })
                    .execute(conn)
                    .await?;

                Ok(reservation)
            })
        })
        .await
    }

    #[instrument(skip(self, reservation, story), fields(usage_event = %reservation.usage_event_id))]
    async fn commit_generation(
        &self,
        reservation: &Reservation,
        story: NewUserStory,
    ) -> StoreResult<UserStory> {
        let mut conn = self.conn().await?;
        let reservation = reservation.clone();

        let row = conn
            .transaction::<_, StoreError, _>(|conn| {
                Box::pin(async move {
                    let now = Utc::now();
                    let row = diesel::insert_into(user_stories::table)
                        .values(&story)
                        .returning(UserStoryRow::as_returning())
                        .get_result(conn)
                        .await?;

                    let updated = diesel::update(
                        usage_events::table
                            .find(reservation.usage_event_id)
                            .filter(usage_events::status.eq(UsageStatus::Pending.as_str())),
                    )
                    .set((
                        usage_events::status.eq(UsageStatus::Committed.as_str()),
                        usage_events::story_id.eq(Some(row.id)),
                        usage_events::committed_at.eq(Some(now)),
                    ))
                    .execute(conn)
                    .await?;

                    if updated == 0 {
                        // Reservation was swept while the generator ran; still charge it
                        warn!("Reservation expired before commit, recording usage directly");
                        diesel::insert_into(usage_events::table)
                            .values(NewUsageEvent {
                                id: Uuid::new_v4(),
                                user_id: reservation.user_id,
                                charge_source: reservation.charge_source.as_str().to_string(),
                                status: UsageStatus::Committed.as_str().to_string(),
                                story_id: Some(row.id),
                                created_at: reservation.created_at,
                                committed_at: Some(now),
                            })
                            .execute(conn)
                            .await?;
                    }

                    Ok(row)
                })
            })
            .await?;

        Ok(UserStory::try_from(row)?)
    }

    async fn release_generation(&self, reservation: &Reservation) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        diesel::delete(
            usage_events::table
                .find(reservation.usage_event_id)
                .filter(usage_events::status.eq(UsageStatus::Pending.as_str())),
        )
        .execute(&mut conn)
        .await?;
        Ok(())
    }

    async fn expire_reservations(&self, older_than: DateTime<Utc>) -> StoreResult<usize> {
        let mut conn = self.conn().await?;
        Ok(diesel::delete(
            usage_events::table
                .filter(usage_events::status.eq(UsageStatus::Pending.as_str()))
                .filter(usage_events::created_at.lt(older_than)),
        )
        .execute(&mut conn)
        .await?)
    }

    async fn is_event_processed(&self, event_id: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let found: i64 = processed_webhook_events::table
            .filter(processed_webhook_events::event_id.eq(event_id))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(found > 0)
    }

    async fn mark_event_processed(&self, event_id: &str, event_type: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let inserted = diesel::insert_into(processed_webhook_events::table)
            .values(ProcessedWebhookEvent {
                event_id: event_id.to_string(),
                event_type: event_type.to_string(),
                processed_at: Utc::now(),
            })
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;
        Ok(inserted == 1)
    }

    async fn purge_processed_events(&self, older_than: DateTime<Utc>) -> StoreResult<usize> {
        let mut conn = self.conn().await?;
        Ok(diesel::delete(
            processed_webhook_events::table
                .filter(processed_webhook_events::processed_at.lt(older_than)),
        )
        .execute(&mut conn)
        .await?)
    }

    async fn health_check(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>("1"))
            .get_result::<i32>(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StoryStore for PgStore {
    async fn list_stories(
        &self,
        user_id: Uuid,
        pagination: &StoryPagination,
    ) -> StoreResult<(Vec<UserStory>, i64)> {
        let mut conn = self.conn().await?;

        let total: i64 = user_stories::table
            .filter(user_stories::user_id.eq(user_id))
            .count()
            .get_result(&mut conn)
            .await?;

        let rows = user_stories::table
            .filter(user_stories::user_id.eq(user_id))
            .order(user_stories::created_at.desc())
            .offset(pagination.offset())
            .limit(pagination.limit())
            .select(UserStoryRow::as_select())
            .load(&mut conn)
            .await?;

        let stories = rows
            .into_iter()
            .map(UserStory::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((stories, total))
    }

    async fn get_story(&self, user_id: Uuid, story_id: Uuid) -> StoreResult<Option<UserStory>> {
        let mut conn = self.conn().await?;
        let row = user_stories::table
            .find(story_id)
            .filter(user_stories::user_id.eq(user_id))
            .select(UserStoryRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;

        Ok(row.map(UserStory::try_from).transpose()?)
    }

    async fn delete_story(&self, user_id: Uuid, story_id: Uuid) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(
            user_stories::table
                .find(story_id)
                .filter(user_stories::user_id.eq(user_id)),
        )
        .execute(&mut conn)
        .await?;
        Ok(deleted > 0)
    }

    async fn delete_all_stories(&self, user_id: Uuid) -> StoreResult<usize> {
        let mut conn = self.conn().await?;
        Ok(
            diesel::delete(user_stories::table.filter(user_stories::user_id.eq(user_id)))
                .execute(&mut conn)
                .await?,
        )
    }
}
