// Authentication models for Story Gen Backend
// Tokens are issued by the external identity provider; we only verify them

use serde::{Deserialize, Serialize};

/// Access token claims issued by the identity provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessTokenClaims {
    /// User ID (subject), a UUID
    pub sub: String,

    /// User email address, absent for phone/anonymous sign-ins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Provider role (e.g. "authenticated")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Session or token identifier
    #[serde(default, alias = "session_id", skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// Audience
    pub aud: String,

    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Issued at timestamp (Unix epoch seconds)
    pub iat: u64,

    /// Expires at timestamp (Unix epoch seconds)
    pub exp: u64,
}

impl AccessTokenClaims {
    /// Check if token is expired
    pub fn is_expired(&self) -> bool {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        self.exp < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_accept_session_id_alias() {
        let claims: AccessTokenClaims = serde_json::from_value(serde_json::json!({
            "sub": "6f1c1e0e-33a5-4d7e-9a9a-0c8b1b0d7d11",
            "email": "writer@example.com",
            "role": "authenticated",
            "session_id": "sess-1",
            "aud": "authenticated",
            "iat": 1,
            "exp": 2
        }))
        .unwrap();

        assert_eq!(claims.jti.as_deref(), Some("sess-1"));
        assert!(claims.iss.is_none());
        assert!(claims.is_expired());
    }
}
