//! Stateless signing and verification of access and refresh tokens.
//!
//! Both token kinds are HS256 JWTs sharing one secret. Verification pins the
//! algorithm so a token signed with anything else (including `none`) never
//! validates, and checks the `exp` claim against wall-clock time at the
//! moment of verification.

use crate::error::AuthError;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;

/// Claims carried by an access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub email: String,
    pub permissions: Vec<String>,
    pub exp: usize,
}

/// Claims carried by a refresh token.
#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub email: String,
    pub exp: usize,
}

pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 7);

#[derive(Clone)]
pub struct JwtManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    fn expiry(ttl: Duration) -> usize {
        (OffsetDateTime::now_utc() + ttl).unix_timestamp() as usize
    }

    fn validation() -> Validation {
        // Pinned algorithm list rejects algorithm-substitution forgeries.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        // No clock-skew allowance: a 60s access token must die at 60s, not
        // at the default leeway's 120s.
        validation.leeway = 0;
        validation
    }

    pub fn create_access_token(
        &self,
        email: &str,
        permissions: &[String],
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let claims = AccessClaims {
            email: email.to_string(),
            permissions: permissions.to_vec(),
            exp: Self::expiry(ttl),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn create_refresh_token(&self, email: &str, ttl: Duration) -> Result<String, AuthError> {
        let claims = RefreshClaims {
            email: email.to_string(),
            exp: Self::expiry(ttl),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    /// Fail-closed validity check for access tokens.
    pub fn verify_access_token(&self, token: &str) -> bool {
        self.decode_access(token).is_ok()
    }

    /// Fail-closed validity check for refresh tokens.
    pub fn verify_refresh_token(&self, token: &str) -> bool {
        self.decode_refresh(token).is_ok()
    }

    pub fn decode_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        decode::<AccessClaims>(token, &self.decoding, &Self::validation())
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }

    fn decode_refresh(&self, token: &str) -> Result<RefreshClaims, AuthError> {
        decode::<RefreshClaims>(token, &self.decoding, &Self::validation())
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }

    pub fn get_email_from_refresh_token(&self, token: &str) -> Result<String, AuthError> {
        Ok(self.decode_refresh(token)?.email)
    }

    pub fn get_email_from_access_token(&self, token: &str) -> Result<String, AuthError> {
        Ok(self.decode_access(token)?.email)
    }

    pub fn get_permissions_from_access_token(
        &self,
        token: &str,
    ) -> Result<Vec<String>, AuthError> {
        Ok(self.decode_access(token)?.permissions)
    }
}
