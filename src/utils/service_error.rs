// HTTP-facing error type shared by all handlers
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::config::PlanError;
use crate::services::billing::BillingError;
use crate::services::entitlement::{BillingStatusResponse, EntitlementError};
use crate::services::generator::GeneratorError;
use crate::services::jwt::JwtError;
use crate::services::store::StoreError;
use crate::services::webhook::WebhookError;
use crate::services::stripe::PaymentError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    /// Carries the caller's entitlement so clients can show upgrade options
    #[error("Generation limit reached")]
    PaymentRequired(Box<BillingStatusResponse>),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment provider error: {0}")]
    PaymentProviderError(String),

    #[error("Story generator error: {0}")]
    GeneratorError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error")]
    InternalError,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        if let ServiceError::PaymentRequired(entitlement) = self {
            let status = StatusCode::PAYMENT_REQUIRED;
            let body = Json(json!({
                "error": "Generation limit reached. Purchase credits or subscribe to continue.",
                "status": status.as_u16(),
                "entitlement": entitlement,
            }));
            return (status, body).into_response();
        }

        let (status, error_message) = match self {
            ServiceError::DatabaseError(msg) => {
                error!("Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            },
            ServiceError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            ServiceError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ServiceError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ServiceError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ServiceError::PaymentProviderError(msg) => {
                error!("Payment provider error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "Payment provider unavailable".to_string(),
                )
            },
            ServiceError::GeneratorError(msg) => {
                error!("Story generator error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "Failed to generate user story".to_string(),
                )
            },
            ServiceError::ConfigError(msg) => {
                error!("Configuration error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            },
            ServiceError::InternalError | ServiceError::PaymentRequired(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

// Conversion from various error types
impl From<diesel::result::Error> for ServiceError {
    fn from(error: diesel::result::Error) -> Self {
        match error {
            diesel::result::Error::NotFound => {
                ServiceError::NotFound("Resource not found".to_string())
            },
            _ => ServiceError::DatabaseError(error.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(error: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(error.to_string())
    }
}

impl From<StoreError> for ServiceError {
    fn from(error: StoreError) -> Self {
        ServiceError::DatabaseError(error.to_string())
    }
}

impl From<EntitlementError> for ServiceError {
    fn from(error: EntitlementError) -> Self {
        match error {
            EntitlementError::LimitReached(decision) => {
                ServiceError::PaymentRequired(Box::new(BillingStatusResponse::from(&*decision)))
            },
            EntitlementError::Store(e) => e.into(),
        }
    }
}

impl From<PlanError> for ServiceError {
    fn from(error: PlanError) -> Self {
        match error {
            PlanError::UnknownPlan(_) => ServiceError::ValidationError(error.to_string()),
            PlanError::PriceNotConfigured(_) => ServiceError::ConfigError(error.to_string()),
        }
    }
}

impl From<PaymentError> for ServiceError {
    fn from(error: PaymentError) -> Self {
        match error {
            PaymentError::NotConfigured(msg) => ServiceError::ConfigError(msg),
            other => ServiceError::PaymentProviderError(other.to_string()),
        }
    }
}

impl From<BillingError> for ServiceError {
    fn from(error: BillingError) -> Self {
        match error {
            BillingError::MissingEmail => ServiceError::ValidationError(error.to_string()),
            BillingError::AlreadySubscribed => ServiceError::Conflict(error.to_string()),
            BillingError::NoCustomer => ServiceError::NotFound(error.to_string()),
            BillingError::Plan(e) => e.into(),
            BillingError::Payment(e) => e.into(),
            BillingError::Store(e) => e.into(),
        }
    }
}

impl From<GeneratorError> for ServiceError {
    fn from(error: GeneratorError) -> Self {
        ServiceError::GeneratorError(error.to_string())
    }
}

impl From<WebhookError> for ServiceError {
    fn from(error: WebhookError) -> Self {
        if error.is_client_error() {
            return ServiceError::ValidationError(error.to_string());
        }
        // Any 5xx makes Stripe retry the delivery
        error!("Webhook processing failed: {}", error);
        ServiceError::InternalError
    }
}

impl From<JwtError> for ServiceError {
    fn from(_: JwtError) -> Self {
        ServiceError::Unauthorized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::entitlement::{EntitlementPolicy, EntitlementSnapshot};

    #[test]
    fn test_status_codes() {
        let cases = [
            (ServiceError::ValidationError("bad".into()), StatusCode::BAD_REQUEST),
            (ServiceError::NotFound("gone".into()), StatusCode::NOT_FOUND),
            (ServiceError::Unauthorized, StatusCode::UNAUTHORIZED),
            (ServiceError::Conflict("dup".into()), StatusCode::CONFLICT),
            (ServiceError::GeneratorError("down".into()), StatusCode::BAD_GATEWAY),
            (ServiceError::DatabaseError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn test_limit_reached_maps_to_payment_required() {
        let decision = EntitlementPolicy::default().evaluate(
            &EntitlementSnapshot {
                free_used_this_month: 5,
                ..Default::default()
            },
            chrono::Utc::now(),
        );
        let error: ServiceError = EntitlementError::LimitReached(Box::new(decision)).into();
        assert_eq!(error.into_response().status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn test_billing_errors_map_to_http() {
        let conflict: ServiceError = BillingError::AlreadySubscribed.into();
        assert!(matches!(conflict, ServiceError::Conflict(_)));

        let missing: ServiceError = BillingError::MissingEmail.into();
        assert!(matches!(missing, ServiceError::ValidationError(ref m) if m == "User email not found"));

        let unknown: ServiceError = PlanError::UnknownPlan("weekly".into()).into();
        assert!(matches!(unknown, ServiceError::ValidationError(ref m) if m == "Invalid plan selected"));
    }
}
