// Story generation gated by entitlements, plus the caller's story history

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    NewUserStory, StoryListResponse, StoryPagination, UserStory, UserStoryRequest,
};
use crate::services::entitlement::{BillingStatusResponse, EntitlementPolicy, Reservation};
use crate::services::generator::StoryGenerator;
use crate::services::store::{Store, StoreError};
use crate::utils::markdown::story_to_markdown;
use crate::utils::service_error::ServiceError;

/// A freshly generated story with the entitlement left afterwards
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GeneratedStory {
    pub story: UserStory,
    pub entitlement: BillingStatusResponse,
}

#[derive(Clone)]
pub struct StoryService {
    store: Arc<dyn Store>,
    generator: Arc<dyn StoryGenerator>,
    policy: EntitlementPolicy,
    reservation_ttl: Duration,
}

impl StoryService {
    pub fn new(
        store: Arc<dyn Store>,
        generator: Arc<dyn StoryGenerator>,
        policy: EntitlementPolicy,
        reservation_ttl: Duration,
    ) -> Self {
        Self {
            store,
            generator,
            policy,
            reservation_ttl,
        }
    }

    /// Reserve an entitlement, call the generator, then commit or release
    #[instrument(skip(self, email, request))]
    pub async fn generate(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        mut request: UserStoryRequest,
    ) -> Result<GeneratedStory, ServiceError> {
        // 1. Sanitize and validate request
        request.sanitize();
        request.validate()?;
        request
            .validate_custom()
            .map_err(ServiceError::ValidationError)?;

        // 2. Hold an entitlement while the generator runs
        let reservation = self
            .store
            .reserve_generation(user_id, email, &self.policy, Utc::now(), self.reservation_ttl)
            .await?;
        info!(
            "Reserved {} generation for user {}",
            reservation.charge_source.as_str(),
            user_id
        );

        // 3. Generate
        let generated = match self.generator.generate(&request).await {
            Ok(generated) => generated,
            Err(e) => {
                warn!("Generation failed for user {}: {}", user_id, e);
                self.release(&reservation).await;
                return Err(e.into());
            },
        };

        // 4. Store the story and charge the reservation
        let new_story = match NewUserStory::new(user_id, &request, &generated) {
            Ok(story) => story,
            Err(e) => {
                self.release(&reservation).await;
                return Err(StoreError::from(e).into());
            },
        };

        let story = match self.store.commit_generation(&reservation, new_story).await {
            Ok(story) => story,
            Err(e) => {
                self.release(&reservation).await;
                return Err(e.into());
            },
        };

        let entitlement = self.entitlement(user_id).await?;
        info!("Stored story {} for user {}", story.id, user_id);

        Ok(GeneratedStory { story, entitlement })
    }

    pub async fn list(
        &self,
        user_id: Uuid,
        pagination: &StoryPagination,
    ) -> Result<StoryListResponse, ServiceError> {
        let pagination = pagination.normalized();
        let (stories, total) = self.store.list_stories(user_id, &pagination).await?;
        Ok(StoryListResponse::new(stories, total, &pagination))
    }

    pub async fn get(&self, user_id: Uuid, story_id: Uuid) -> Result<UserStory, ServiceError> {
        self.store
            .get_story(user_id, story_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Story not found".to_string()))
    }

    pub async fn markdown(&self, user_id: Uuid, story_id: Uuid) -> Result<String, ServiceError> {
        let story = self.get(user_id, story_id).await?;
        Ok(story_to_markdown(&story.result))
    }

    /// Usage already charged stays charged
    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: Uuid, story_id: Uuid) -> Result<(), ServiceError> {
        if !self.store.delete_story(user_id, story_id).await? {
            return Err(ServiceError::NotFound("Story not found".to_string()));
        }
        info!("Deleted story {} for user {}", story_id, user_id);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_all(&self, user_id: Uuid) -> Result<usize, ServiceError> {
        let deleted = self.store.delete_all_stories(user_id).await?;
        info!("Deleted {} stories for user {}", deleted, user_id);
        Ok(deleted)
    }

    async fn entitlement(&self, user_id: Uuid) -> Result<BillingStatusResponse, ServiceError> {
        let now = Utc::now();
        let snapshot = self
            .store
            .snapshot(user_id, now, self.reservation_ttl)
            .await?;
        Ok(BillingStatusResponse::from(&self.policy.evaluate(&snapshot, now)))
    }

    async fn release(&self, reservation: &Reservation) {
        // The sweeper cleans up whatever this misses
        if let Err(e) = self.store.release_generation(reservation).await {
            error!(
                "Failed to release reservation {}: {}",
                reservation.usage_event_id, e
            );
        }
    }
}
