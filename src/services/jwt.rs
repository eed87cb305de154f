// Access token verification for tokens issued by the identity provider (HS256)

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

use crate::models::auth::AccessTokenClaims;

// Error types for JWT operations
#[derive(Error, Debug)]
pub enum JwtError {
    #[error("JWT encoding error: {0}")]
    EncodingError(String),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid subject: {0}")]
    InvalidSubject(String),
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => JwtError::TokenExpired,
            ErrorKind::InvalidToken
            | ErrorKind::InvalidSignature
            | ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidAlgorithm => JwtError::InvalidToken,
            _ => JwtError::EncodingError(err.to_string()),
        }
    }
}

// JWT configuration resolved into keys
#[derive(Clone)]
pub struct JwtConfig {
    pub algorithm: Algorithm,
    pub audience: String,
    /// Checked only when set
    pub issuer: Option<String>,
    pub leeway_seconds: u64,
    pub encoding_key: EncodingKey,
    pub decoding_key: DecodingKey,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("algorithm", &self.algorithm)
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .field("leeway_seconds", &self.leeway_seconds)
            .field("encoding_key", &"<redacted>")
            .field("decoding_key", &"<redacted>")
            .finish()
    }
}

impl JwtConfig {
    pub fn new(secret: &str, audience: &str, issuer: Option<&str>, leeway_seconds: u64) -> Self {
        JwtConfig {
            algorithm: Algorithm::HS256,
            audience: audience.to_string(),
            issuer: issuer.map(String::from),
            leeway_seconds,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Create JWT config from centralized app configuration
    pub fn from_app_config(config: &crate::app_config::JwtConfig) -> Result<Self, JwtError> {
        if config.secret.len() < 32 {
            return Err(JwtError::InvalidKeyFormat(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        Ok(Self::new(
            &config.secret,
            &config.audience,
            config.issuer.as_deref(),
            config.leeway_seconds,
        ))
    }

    /// Create JWT config for tests without using lazy static
    pub fn for_test() -> Self {
        Self::new(
            "test-jwt-secret-hs256-at-least-32-chars",
            "authenticated",
            None,
            0,
        )
    }
}

#[derive(Debug, Clone)]
pub struct JwtService {
    config: JwtConfig,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        Self { config }
    }

    /// Issue a token in the identity provider's format (tests and local tooling)
    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        ttl_seconds: u64,
    ) -> Result<String, JwtError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| JwtError::EncodingError(e.to_string()))?
            .as_secs();

        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            email: email.map(String::from),
            role: Some("authenticated".to_string()),
            jti: Some(Uuid::new_v4().to_string()),
            aud: self.config.audience.clone(),
            iss: self.config.issuer.clone(),
            iat: now,
            exp: now + ttl_seconds,
        };

        encode(
            &Header::new(self.config.algorithm),
            &claims,
            &self.config.encoding_key,
        )
        .map_err(Into::into)
    }

    /// Validates an access token and returns the decoded claims
    ///
    /// # Errors
    /// * `JwtError::TokenExpired` - `exp` is in the past beyond the configured leeway
    /// * `JwtError::InvalidToken` - bad signature, audience, issuer or format
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, JwtError> {
        let mut validation = Validation::new(self.config.algorithm);
        validation.set_audience(&[self.config.audience.clone()]);
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer.clone()]);
        }
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.leeway = self.config.leeway_seconds;

        let token_data = decode::<AccessTokenClaims>(token, &self.config.decoding_key, &validation)?;

        Ok(token_data.claims)
    }

    /// Validate and return the subject as a user id
    pub fn authenticate(&self, token: &str) -> Result<(Uuid, AccessTokenClaims), JwtError> {
        let claims = self.validate_access_token(token)?;
        let user_id =
            Uuid::parse_str(&claims.sub).map_err(|_| JwtError::InvalidSubject(claims.sub.clone()))?;
        Ok((user_id, claims))
    }
}
