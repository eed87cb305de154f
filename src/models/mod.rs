pub mod auth;
pub mod billing;
pub mod user_story;

// Re-export common types
pub use auth::*;
pub use billing::{
    BillingCustomer, ChargeSource, CreditGrant, CreditLot, NewBillingCustomer, NewUsageEvent,
    ProcessedWebhookEvent, SubscriptionRecord, SubscriptionState, UsageEvent, UsageStatus,
};
pub use user_story::{
    ApiErrorResponse, ApiSpec, ErrorScenario, NewUserStory, StoryListResponse, StoryPagination,
    TestCase, UserStory, UserStoryRequest, UserStoryResponse, UserStoryRow,
};
