// User story models: generation requests, generated artifacts and stored history

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::schema::user_stories;

// =============================================================================
// GENERATION REQUEST
// =============================================================================

/// Request to generate a user story
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "requirement": "Users can reset their password by email",
    "context": "Consumer web app with email/password sign-in",
    "stakeholders": ["End user", "Support team"],
    "api_required": true,
    "additional_details": "Reset links expire after one hour"
}))]
pub struct UserStoryRequest {
    #[validate(length(max = 5000, message = "Requirement must be less than 5000 characters"))]
    pub requirement: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 5000, message = "Context must be less than 5000 characters"))]
    pub context: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 20, message = "Maximum 20 stakeholders allowed"))]
    pub stakeholders: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_required: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(
        max = 5000,
        message = "Additional details must be less than 5000 characters"
    ))]
    pub additional_details: Option<String>,
}

impl UserStoryRequest {
    /// Checks the derive attributes cannot express
    pub fn validate_custom(&self) -> Result<(), String> {
        if self.requirement.trim().is_empty() {
            return Err("Requirement is required".to_string());
        }

        if let Some(stakeholders) = &self.stakeholders {
            if stakeholders.iter().any(|s| s.chars().count() > 100) {
                return Err("Each stakeholder must be less than 100 characters".to_string());
            }
        }

        Ok(())
    }

    /// Trim input fields and drop empty optional values
    pub fn sanitize(&mut self) {
        fn clean(value: &Option<String>) -> Option<String> {
            value
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        }

        self.requirement = self.requirement.trim().to_string();
        self.context = clean(&self.context);
        self.additional_details = clean(&self.additional_details);
        self.stakeholders = self.stakeholders.as_ref().map(|list| {
            list.iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });
    }
}

// =============================================================================
// GENERATED ARTIFACT
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ErrorScenario {
    pub scenario: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct TestCase {
    pub title: String,
    pub scenario: String,
    pub given: Vec<String>,
    pub when: Vec<String>,
    pub then: Vec<String>,
    pub rest_assured_code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ApiErrorResponse {
    #[serde(deserialize_with = "string_or_number")]
    pub status_code: String,
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ApiSpec {
    pub endpoint: String,
    pub method: String,
    pub description: String,
    #[schema(value_type = Object)]
    pub request_example: serde_json::Value,
    #[schema(value_type = Object)]
    pub response_example: serde_json::Value,
    pub error_responses: Vec<ApiErrorResponse>,
}

/// The generated user story artifact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct UserStoryResponse {
    pub story: String,
    pub value_statement: String,
    pub acceptance_criteria: Vec<String>,
    pub functional_requirements: Vec<String>,
    pub non_functional_requirements: Vec<String>,
    pub error_scenarios: Vec<ErrorScenario>,
    pub technical_considerations: Vec<String>,
    pub use_case_examples: Vec<String>,
    pub priority: String,
    pub effort_estimate: String,
    pub test_cases: Vec<TestCase>,
    pub api_specs: Vec<ApiSpec>,
}

/// Status codes arrive as either "404" or 404 depending on the generator
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

// =============================================================================
// STORED HISTORY
// =============================================================================

/// Raw database row for a stored story
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = user_stories)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserStoryRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub requirement: String,
    pub context: Option<String>,
    pub stakeholders: Option<Vec<Option<String>>>,
    pub api_required: Option<bool>,
    pub additional_details: Option<String>,
    pub result: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// New story for insertion
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_stories)]
pub struct NewUserStory {
    pub id: Uuid,
    pub user_id: Uuid,
    pub requirement: String,
    pub context: Option<String>,
    pub stakeholders: Option<Vec<Option<String>>>,
    pub api_required: Option<bool>,
    pub additional_details: Option<String>,
    pub result: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl NewUserStory {
    pub fn new(
        user_id: Uuid,
        request: &UserStoryRequest,
        result: &UserStoryResponse,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            requirement: request.requirement.clone(),
            context: request.context.clone(),
            stakeholders: request
                .stakeholders
                .as_ref()
                .map(|list| list.iter().cloned().map(Some).collect()),
            api_required: request.api_required,
            additional_details: request.additional_details.clone(),
            result: serde_json::to_value(result)?,
            created_at: Utc::now(),
        })
    }
}

impl From<NewUserStory> for UserStoryRow {
    fn from(story: NewUserStory) -> Self {
        Self {
            id: story.id,
            user_id: story.user_id,
            requirement: story.requirement,
            context: story.context,
            stakeholders: story.stakeholders,
            api_required: story.api_required,
            additional_details: story.additional_details,
            result: story.result,
            created_at: story.created_at,
        }
    }
}

/// A stored story as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserStory {
    pub id: Uuid,
    pub user_id: Uuid,
    pub requirement: String,
    pub context: Option<String>,
    pub stakeholders: Option<Vec<String>>,
    pub api_required: Option<bool>,
    pub additional_details: Option<String>,
    pub result: UserStoryResponse,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<UserStoryRow> for UserStory {
    type Error = serde_json::Error;

    fn try_from(row: UserStoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            requirement: row.requirement,
            context: row.context,
            stakeholders: row
                .stakeholders
                .map(|list| list.into_iter().flatten().collect()),
            api_required: row.api_required,
            additional_details: row.additional_details,
            result: serde_json::from_value(row.result)?,
            created_at: row.created_at,
        })
    }
}

// =============================================================================
// PAGINATION
// =============================================================================

pub const MAX_STORIES_PER_PAGE: i64 = 50;
/// Highest page whose offset still fits an i64
pub const MAX_STORY_PAGE: i64 = i64::MAX / MAX_STORIES_PER_PAGE;

#[derive(Debug, Clone, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StoryPagination {
    #[serde(default = "default_page")]
    pub page: i64,

    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

fn default_page() -> i64 {
    1
}
fn default_per_page() -> i64 {
    5
}

impl Default for StoryPagination {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl StoryPagination {
    /// Clamp page to 1..=MAX_STORY_PAGE and per_page to 1..=50
    pub fn normalized(&self) -> Self {
        Self {
            page: self.page.clamp(1, MAX_STORY_PAGE),
            per_page: self.per_page.clamp(1, MAX_STORIES_PER_PAGE),
        }
    }

    pub fn offset(&self) -> i64 {
        self.page.saturating_sub(1).saturating_mul(self.per_page)
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }
}

/// Paginated story history
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoryListResponse {
    pub stories: Vec<UserStory>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl StoryListResponse {
    pub fn new(stories: Vec<UserStory>, total: i64, pagination: &StoryPagination) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            (total + pagination.per_page - 1) / pagination.per_page
        };

        Self {
            stories,
            total,
            page: pagination.page,
            per_page: pagination.per_page,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_requirement_rejected() {
        let request = UserStoryRequest {
            requirement: "   ".to_string(),
            context: None,
            stakeholders: None,
            api_required: None,
            additional_details: None,
        };
        assert_eq!(
            request.validate_custom(),
            Err("Requirement is required".to_string())
        );
    }

    #[test]
    fn test_sanitize_trims_and_drops_empty_values() {
        let mut request = UserStoryRequest {
            requirement: "  Export invoices  ".to_string(),
            context: Some("   ".to_string()),
            stakeholders: Some(vec![" Finance ".to_string(), "".to_string()]),
            api_required: Some(false),
            additional_details: Some(" CSV only ".to_string()),
        };
        request.sanitize();

        assert_eq!(request.requirement, "Export invoices");
        assert_eq!(request.context, None);
        assert_eq!(request.stakeholders, Some(vec!["Finance".to_string()]));
        assert_eq!(request.additional_details.as_deref(), Some("CSV only"));
    }

    #[test]
    fn test_response_tolerates_missing_fields_and_numeric_status() {
        let parsed: UserStoryResponse = serde_json::from_value(serde_json::json!({
            "story": "As a user I want to export invoices",
            "api_specs": [{
                "endpoint": "/invoices/export",
                "method": "GET",
                "error_responses": [{"status_code": 404, "error": "NotFound", "message": "none"}]
            }]
        }))
        .unwrap();

        assert!(parsed.acceptance_criteria.is_empty());
        assert_eq!(parsed.api_specs[0].error_responses[0].status_code, "404");
    }

    #[test]
    fn test_row_conversion_keeps_result() {
        let request = UserStoryRequest {
            requirement: "Export invoices".to_string(),
            context: None,
            stakeholders: Some(vec!["Finance".to_string()]),
            api_required: Some(true),
            additional_details: None,
        };
        let result = UserStoryResponse {
            story: "As a clerk I want exports".to_string(),
            priority: "High".to_string(),
            ..Default::default()
        };
        let new_story = NewUserStory::new(Uuid::new_v4(), &request, &result).unwrap();
        let story = UserStory::try_from(UserStoryRow::from(new_story)).unwrap();

        assert_eq!(story.result, result);
        assert_eq!(story.stakeholders, Some(vec!["Finance".to_string()]));
    }

    #[test]
    fn test_pagination_clamps_and_counts_pages() {
        let pagination = StoryPagination {
            page: 0,
            per_page: 500,
        }
        .normalized();
        assert_eq!(pagination.page, 1);
        assert_eq!(pagination.per_page, MAX_STORIES_PER_PAGE);

        let page = StoryPagination::default();
        assert_eq!(StoryListResponse::new(vec![], 11, &page).total_pages, 3);
        assert_eq!(StoryListResponse::new(vec![], 0, &page).total_pages, 0);
        assert_eq!(page.offset(), 0);
    }

    #[test]
    fn test_huge_page_offset_does_not_overflow() {
        let pagination = StoryPagination {
            page: i64::MAX,
            per_page: 50,
        }
        .normalized();
        assert_eq!(pagination.page, MAX_STORY_PAGE);
        assert!(pagination.offset() > 0);

        let raw = StoryPagination {
            page: i64::MAX,
            per_page: i64::MAX,
        };
        assert_eq!(raw.offset(), i64::MAX);
        assert_eq!(StoryPagination { page: i64::MIN, per_page: 5 }.offset(), i64::MIN);
    }
}
