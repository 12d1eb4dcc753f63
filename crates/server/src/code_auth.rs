//! Single-use login codes for the secondary-channel flow.
//!
//! A short alphanumeric code stands in for the OAuth redirect: the pending
//! browser displays the code, a second (already authenticated) device submits
//! it, and the pending flow is granted for that device's identity. Codes live
//! in an expiring key-value store under two keys:
//!
//! - `auth_code:{code}` → the `login_token` awaiting resolution
//! - `code_email:{code}` → the email asserted by the second device
//!
//! Both expire after the configured TTL (5 minutes by default); a consumed or
//! invalidated code is deleted immediately, so replay is impossible.

use crate::error::AuthError;
use crate::store::{StoreError, TtlStore};
use std::sync::Arc;
use std::time::Duration;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const CODE_LEN: usize = 6;

// Collisions are improbable in a 62^6 space but not impossible; bail out
// rather than overwrite another flow's code.
const MAX_GENERATE_ATTEMPTS: usize = 5;

pub struct CodeAuthentication {
    store: Arc<dyn TtlStore>,
    code_ttl: Duration,
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => AuthError::StoreUnavailable(msg),
        }
    }
}

impl CodeAuthentication {
    pub fn new(store: Arc<dyn TtlStore>, code_ttl: Duration) -> Self {
        Self { store, code_ttl }
    }

    fn code_key(code: &str) -> String {
        format!("auth_code:{code}")
    }

    fn email_key(code: &str) -> String {
        format!("code_email:{code}")
    }

    fn random_code() -> Result<String, AuthError> {
        // Rejection sampling: 248 is the largest multiple of 62 that fits in
        // a byte, so accepted bytes map uniformly onto the alphabet.
        const ACCEPT_LIMIT: u8 = (u8::MAX / CODE_ALPHABET.len() as u8) * CODE_ALPHABET.len() as u8;
        let mut code = String::with_capacity(CODE_LEN);
        while code.len() < CODE_LEN {
            let mut bytes = [0u8; CODE_LEN];
            getrandom::fill(&mut bytes)
                .map_err(|e| AuthError::StoreUnavailable(format!("rng failure: {e}")))?;
            for b in bytes {
                if b < ACCEPT_LIMIT && code.len() < CODE_LEN {
                    code.push(CODE_ALPHABET[b as usize % CODE_ALPHABET.len()] as char);
                }
            }
        }
        Ok(code)
    }

    /// Generate and store a fresh code for a pending `login_token`.
    #[tracing::instrument(skip(self))]
    pub async fn generate_code(&self, login_token: &str) -> Result<String, AuthError> {
        for _ in 0..MAX_GENERATE_ATTEMPTS {
            let code = Self::random_code()?;
            if self.store.exists(&Self::code_key(&code)).await? {
                continue;
            }
            self.store
                .set(&Self::code_key(&code), login_token, self.code_ttl)
                .await?;
            tracing::debug!(code_len = code.len(), "Generated login code");
            return Ok(code);
        }
        Err(AuthError::StoreUnavailable(
            "could not find a free login code".into(),
        ))
    }

    /// True iff the code exists, is unexpired and belongs to `login_token`.
    /// Does not consume the code.
    pub async fn verify_code(&self, code: &str, login_token: &str) -> Result<bool, AuthError> {
        match self.store.get(&Self::code_key(code)).await? {
            Some(stored) => Ok(stored == login_token),
            None => Ok(false),
        }
    }

    /// The `login_token` a live code was generated for.
    pub async fn login_token_for_code(&self, code: &str) -> Result<Option<String>, AuthError> {
        Ok(self.store.get(&Self::code_key(code)).await?)
    }

    /// Record the email asserted for this code by the confirming device.
    /// Fails with `NotFound` once the code itself has expired or been used.
    pub async fn associate_email(&self, code: &str, email: &str) -> Result<(), AuthError> {
        if !self.store.exists(&Self::code_key(code)).await? {
            return Err(AuthError::NotFound(format!("login code {code}")));
        }
        self.store
            .set(&Self::email_key(code), email, self.code_ttl)
            .await?;
        Ok(())
    }

    pub async fn get_email_by_code(&self, code: &str) -> Result<Option<String>, AuthError> {
        Ok(self.store.get(&Self::email_key(code)).await?)
    }

    /// Idempotent removal of a code and its email association. Called right
    /// after consumption to enforce single use, and by the expiry sweep.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate_code(&self, code: &str) -> Result<(), AuthError> {
        self.store.delete(&Self::code_key(code)).await?;
        self.store.delete(&Self::email_key(code)).await?;
        Ok(())
    }

    /// Drop expired code records. Delegates to the store's bulk purge.
    pub async fn purge_expired(&self) -> Result<(), AuthError> {
        self.store.purge_expired().await?;
        Ok(())
    }
}
