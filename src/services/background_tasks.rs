// Background task scheduler
// Sweeps abandoned generation reservations and prunes webhook bookkeeping

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::app::AppState;
use crate::services::store::{BillingStore, StoreResult};

const WEBHOOK_PURGE_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Delete pending reservations older than the TTL
pub async fn sweep_reservations<S: BillingStore + ?Sized>(
    store: &S,
    reservation_ttl: Duration,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let expired = store.expire_reservations(now - reservation_ttl).await?;
    if expired > 0 {
        info!("Expired {} abandoned reservations", expired);
    } else {
        debug!("No abandoned reservations");
    }
    Ok(expired)
}

/// Forget processed webhook event ids past the retention window
pub async fn purge_webhook_events<S: BillingStore + ?Sized>(
    store: &S,
    retention_days: i64,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let purged = store
        .purge_processed_events(now - Duration::days(retention_days))
        .await?;
    info!("Purged {} processed webhook events", purged);
    Ok(purged)
}

/// Background task manager
pub struct BackgroundTaskManager {
    state: AppState,
}

impl BackgroundTaskManager {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Start all background tasks
    pub async fn start_all_tasks(&self) {
        info!("Starting background tasks");

        let config = self.state.config.clone();
        let reservation_ttl = Duration::seconds(config.entitlement.reservation_ttl as i64);
        let sweep_every = config.tasks.reservation_sweep_interval.max(1);
        let retention_days = config.tasks.webhook_event_retention_days;

        let store = Arc::clone(&self.state.store);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(sweep_every));
            loop {
                interval.tick().await;
                if let Err(e) = sweep_reservations(store.as_ref(), reservation_ttl, Utc::now()).await {
                    error!("Reservation sweep failed: {}", e);
                }
            }
        });

        let store = Arc::clone(&self.state.store);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(WEBHOOK_PURGE_INTERVAL_SECS));
            loop {
                interval.tick().await;
                if let Err(e) = purge_webhook_events(store.as_ref(), retention_days, Utc::now()).await
                {
                    error!("Webhook event purge failed: {}", e);
                }
            }
        });
    }
}

/// Initialize background tasks (call this in main.rs)
pub async fn initialize_background_tasks(state: AppState) {
    let task_manager = BackgroundTaskManager::new(state);
    task_manager.start_all_tasks().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::entitlement::EntitlementPolicy;
    use crate::services::store::MemoryStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sweep_frees_abandoned_reservation() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let policy = EntitlementPolicy {
            free_monthly_limit: 1,
            credits_per_pack: 30,
        };
        let ttl = Duration::minutes(15);
        let reserved_at = Utc::now() - Duration::minutes(20);

        store
            .reserve_generation(user_id, None, &policy, reserved_at, ttl)
            .await
            .unwrap();

        assert_eq!(sweep_reservations(&store, ttl, Utc::now()).await.unwrap(), 1);
        assert!(store.usage_events().await.is_empty());
        assert_eq!(sweep_reservations(&store, ttl, Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_keeps_fresh_reservation() {
        let store = MemoryStore::new();
        let ttl = Duration::minutes(15);

        store
            .reserve_generation(Uuid::new_v4(), None, &EntitlementPolicy::default(), Utc::now(), ttl)
            .await
            .unwrap();

        assert_eq!(sweep_reservations(&store, ttl, Utc::now()).await.unwrap(), 0);
        assert_eq!(store.usage_events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_respects_retention() {
        let store = MemoryStore::new();
        store.mark_event_processed("evt_recent", "invoice.paid").await.unwrap();

        assert_eq!(purge_webhook_events(&store, 30, Utc::now()).await.unwrap(), 0);
        assert_eq!(
            purge_webhook_events(&store, 30, Utc::now() + Duration::days(31))
                .await
                .unwrap(),
            1
        );
        assert!(!store.is_event_processed("evt_recent").await.unwrap());
    }
}
