// Services module for Story Gen Backend
// Business logic layer for the application

pub mod background_tasks;
pub mod billing;
pub mod entitlement;
pub mod generator;
pub mod jwt;
pub mod store;
pub mod stories;
pub mod stripe;
pub mod webhook;

// Re-export commonly used services
pub use background_tasks::initialize_background_tasks;
pub use billing::{BillingError, BillingService};
pub use entitlement::{
    BillingStatusResponse, EntitlementDecision, EntitlementError, EntitlementPolicy,
};
pub use generator::{GeneratorError, HttpStoryGenerator, StoryGenerator};
pub use jwt::{JwtConfig, JwtError, JwtService};
pub use store::{BillingStore, MemoryStore, PgStore, Store, StoreError, StoryStore};
pub use stories::{GeneratedStory, StoryService};
pub use self::stripe::{PaymentError, PaymentGateway, StripeClient};
pub use webhook::{WebhookError, WebhookProcessor};
