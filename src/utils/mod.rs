// Utility modules for Story Gen Backend

pub mod markdown;
pub mod service_error;

pub use markdown::story_to_markdown;
pub use service_error::ServiceError;
