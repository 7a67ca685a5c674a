//! # Agent Bearer Tokens
//!
//! Optional JWT check layered over the mandatory request signature. A request
//! without an `Authorization` header passes; a request with one must carry a
//! valid HMAC-signed token.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use thiserror::Error;

/// Token verification failures. The display text is returned to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Invalid Authorization format")]
    InvalidFormat,

    #[error("JWT secret not configured")]
    SecretNotConfigured,

    #[error("JWT verification failed: {0}")]
    VerificationFailed(String),
}

/// Result type for token operations
pub type TokenResult<T> = Result<T, TokenError>;

/// Verifies optional agent bearer tokens.
#[derive(Clone)]
pub struct TokenVerifier {
    secret: Option<String>,
    validation: Validation,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("secret_configured", &self.secret.is_some())
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    /// Create a verifier. With no secret every supplied token is rejected.
    #[must_use]
    pub fn new(secret: Option<String>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        // Claims are checked when present but none is mandatory.
        validation.set_required_spec_claims::<&str>(&[]);
        validation.validate_aud = false;

        Self { secret, validation }
    }

    /// Verify the `Authorization` header value, if any.
    ///
    /// # Returns
    /// `Ok(None)` when no header was sent, `Ok(Some(claims))` for a valid
    /// token. Claims are returned for logging only.
    pub fn verify(&self, authorization: Option<&str>) -> TokenResult<Option<Value>> {
        let Some(header) = authorization else {
            return Ok(None);
        };
        let token = bearer_token(header).ok_or(TokenError::InvalidFormat)?;
        let secret = self
            .secret
            .as_deref()
            .ok_or(TokenError::SecretNotConfigured)?;

        decode::<Value>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &self.validation,
        )
        .map(|data| Some(data.claims))
        .map_err(|e| TokenError::VerificationFailed(e.to_string()))
    }
}

/// Extract the token from a `Bearer <token>` header (scheme is case-insensitive).
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
