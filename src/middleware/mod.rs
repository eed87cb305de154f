// Middleware modules for Story Gen Backend

pub mod auth;
pub mod auth_middleware;
pub mod cors;

// Re-export auth types
pub use auth::AuthenticatedUser;
pub use auth_middleware::auth_middleware;
pub use cors::cors_layer;
