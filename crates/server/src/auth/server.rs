//! The authorization server: orchestrates both login paths through the
//! shared auth-state table and issues the resulting token pairs.
//!
//! Both flows converge on the same transition: something asserts an identity
//! for a pending `login_token`, the server resolves it to a local user, mints
//! an access/refresh pair and moves the state `pending → granted`. Failures
//! inside a flow deny the state instead of propagating to the polling client,
//! which only ever observes `pending | denied | granted`.
//!
//! The OAuth `state` parameter is never the `login_token` itself: it is a
//! fresh unguessable value bound to the token through an expiring index, so
//! the correlation handle does not leak through browser history or Referer
//! headers, and a forged callback cannot name a flow it was not issued for.

use crate::auth::directory::UserDirectory;
use crate::auth::state::{AuthState, AuthStateTable};
use crate::code_auth::CodeAuthentication;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::jwt::JwtManager;
use crate::providers::ProviderRegistry;
use dashmap::DashMap;
use std::time::Duration;
use time::OffsetDateTime;

struct StateBinding {
    login_token: String,
    provider: String,
    expires_at: OffsetDateTime,
}

impl StateBinding {
    fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() > self.expires_at
    }
}

pub struct AuthorizationServer {
    providers: ProviderRegistry,
    jwt: JwtManager,
    code_auth: CodeAuthentication,
    directory: UserDirectory,
    states: AuthStateTable,
    /// OAuth `state` parameter → pending `login_token`.
    oauth_states: DashMap<String, StateBinding>,
    login_ttl: Duration,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl AuthorizationServer {
    pub fn new(
        providers: ProviderRegistry,
        jwt: JwtManager,
        code_auth: CodeAuthentication,
        directory: UserDirectory,
        auth_config: &AuthConfig,
    ) -> Self {
        Self {
            providers,
            jwt,
            code_auth,
            directory,
            states: AuthStateTable::new(),
            oauth_states: DashMap::new(),
            login_ttl: Duration::from_secs(auth_config.login_ttl_secs),
            access_ttl: Duration::from_secs(auth_config.access_token_ttl_secs),
            refresh_ttl: Duration::from_secs(auth_config.refresh_token_ttl_secs),
        }
    }

    pub fn jwt(&self) -> &JwtManager {
        &self.jwt
    }

    pub fn directory(&self) -> &UserDirectory {
        &self.directory
    }

    /// Generate an unguessable OAuth `state` value.
    fn generate_state() -> String {
        use base64::Engine;
        let mut bytes = [0u8; 32];
        getrandom::fill(&mut bytes).expect("Failed to generate random bytes");
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Start an OAuth login flow. Registers a pending state for
    /// `login_token` and returns the provider's authorization URL.
    #[tracing::instrument(skip(self))]
    pub fn initiate_oauth(
        &self,
        provider_type: &str,
        login_token: &str,
    ) -> Result<String, AuthError> {
        let provider = self.providers.get(provider_type)?;

        let state = Self::generate_state();
        self.states.insert_pending(login_token, self.login_ttl);
        self.oauth_states.insert(
            state.clone(),
            StateBinding {
                login_token: login_token.to_string(),
                provider: provider_type.to_string(),
                expires_at: OffsetDateTime::now_utc() + self.login_ttl,
            },
        );

        tracing::info!(provider = provider_type, "Initiated OAuth login flow");
        Ok(provider.get_authorization_url(&state))
    }

    /// Resolve an OAuth provider callback.
    ///
    /// The `state` binding is consumed on first sight, so a replayed callback
    /// finds nothing and is a no-op; it can never re-grant or re-deny. An
    /// unrecognized `state` denies nothing - in particular not some other
    /// pending flow.
    #[tracing::instrument(skip(self, code, state))]
    pub async fn handle_oauth_callback(
        &self,
        provider_type: &str,
        code: &str,
        state: &str,
        error: &str,
    ) -> Result<(), AuthError> {
        let Some((_, binding)) = self.oauth_states.remove(state) else {
            tracing::warn!(provider = provider_type, "Callback with unknown state");
            return Ok(());
        };
        if binding.is_expired() {
            return Ok(());
        }
        let login_token = binding.login_token;

        if !error.is_empty() {
            tracing::warn!(provider = provider_type, error, "Provider reported error");
            self.states.deny(&login_token);
            return Ok(());
        }
        if binding.provider != provider_type {
            tracing::warn!(
                expected = binding.provider,
                got = provider_type,
                "Callback provider does not match initiation"
            );
            self.states.deny(&login_token);
            return Ok(());
        }

        let provider = match self.providers.get(provider_type) {
            Ok(p) => p,
            Err(e) => {
                self.states.deny(&login_token);
                return Err(e);
            }
        };

        // Provider round-trips: any failure denies the flow rather than
        // surfacing to the polling client.
        let user_info = match provider.exchange_code(code).await {
            Ok(tokens) => match provider.get_user_info(&tokens.access_token).await {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!(error = %e, "User info fetch failed");
                    self.states.deny(&login_token);
                    return Ok(());
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Code exchange failed");
                self.states.deny(&login_token);
                return Ok(());
            }
        };

        let email = user_info.email.trim().to_lowercase();
        let user = match self.directory.find_or_create(&email, &user_info.name).await {
            Ok(u) => u,
            Err(e) => {
                tracing::error!(error = %e, "Directory lookup failed during callback");
                self.states.deny(&login_token);
                return Ok(());
            }
        };

        match self.issue_tokens(&user.email).await {
            Ok((access_token, refresh_token)) => {
                if !self
                    .states
                    .grant(&login_token, access_token, refresh_token.clone())
                {
                    // Lost the race or the flow expired; drop the orphaned
                    // refresh token we just stored.
                    let _ = self
                        .directory
                        .remove_refresh_token(&user.email, &refresh_token)
                        .await;
                    tracing::info!("Callback resolved an already-terminal flow");
                } else {
                    tracing::info!(provider = provider_type, "OAuth login granted");
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Token issuance failed during callback");
                self.states.deny(&login_token);
                Ok(())
            }
        }
    }

    /// Start a code-based login flow: pending state plus a short-lived
    /// single-use code for the second device.
    #[tracing::instrument(skip(self))]
    pub async fn initiate_code_auth(&self, login_token: &str) -> Result<String, AuthError> {
        self.states.insert_pending(login_token, self.login_ttl);
        match self.code_auth.generate_code(login_token).await {
            Ok(code) => {
                tracing::info!("Initiated code login flow");
                Ok(code)
            }
            Err(e) => {
                // Store outage: abort the flow entirely instead of leaving a
                // pending state that can never resolve.
                self.states.remove(login_token);
                Err(e)
            }
        }
    }

    /// Second-device resolution of a code flow: `email` is the identity the
    /// confirming device has already proven. Finalizes the pending flow at
    /// most once and retires the code.
    #[tracing::instrument(skip(self, code))]
    pub async fn confirm_code(&self, code: &str, email: &str) -> Result<(), AuthError> {
        let login_token = self
            .code_auth
            .login_token_for_code(code)
            .await?
            .ok_or_else(|| AuthError::NotFound("login code".into()))?;

        self.code_auth.associate_email(code, email).await?;

        let result = self.grant_for_email(&login_token, email).await;
        if result.is_err() {
            // Resolve the flow for the poller instead of leaving it pending
            // until TTL, same as a failed OAuth callback.
            self.states.deny(&login_token);
        }

        // Single use: retire the code no matter how resolution went.
        self.code_auth.invalidate_code(code).await?;
        result
    }

    async fn grant_for_email(&self, login_token: &str, email: &str) -> Result<(), AuthError> {
        let user = self.directory.find_or_create(email, "").await?;
        let (access_token, refresh_token) = self.issue_tokens(&user.email).await?;
        if !self
            .states
            .grant(login_token, access_token, refresh_token.clone())
        {
            let _ = self
                .directory
                .remove_refresh_token(&user.email, &refresh_token)
                .await;
            tracing::info!("Code confirmation resolved an already-terminal flow");
        }
        Ok(())
    }

    /// Current state of a login flow. Pure read: unknown and expired tokens
    /// report a synthetic denied state, and the only mutation is lazy
    /// eviction of an expired entry.
    pub fn check_auth_status(&self, login_token: &str) -> AuthState {
        self.states
            .snapshot(login_token)
            .unwrap_or_else(AuthState::denied)
    }

    /// Mint an access/refresh pair for `email` and record the refresh token
    /// in the user's valid set.
    async fn issue_tokens(&self, email: &str) -> Result<(String, String), AuthError> {
        let user = self
            .directory
            .find_by_email(email)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("user {email}")))?;
        let permissions = self.directory.permissions_for(user.id).await?;

        let access_token = self
            .jwt
            .create_access_token(&user.email, &permissions, self.access_ttl)?;
        let refresh_token = self.jwt.create_refresh_token(&user.email, self.refresh_ttl)?;
        self.directory
            .add_refresh_token(&user.email, &refresh_token)
            .await?;
        Ok((access_token, refresh_token))
    }

    /// Rotate a refresh token: the presented token must verify *and* still be
    /// a member of the user's valid set, which is what catches replay of a
    /// rotated-out token.
    ///
    /// The delete itself is the membership check: its row count decides who
    /// spent the token, so two concurrent presentations can never both win.
    #[tracing::instrument(skip(self, refresh_token))]
    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<(String, String), AuthError> {
        let email = self.jwt.get_email_from_refresh_token(refresh_token)?;

        if !self
            .directory
            .remove_refresh_token(&email, refresh_token)
            .await?
        {
            tracing::warn!("Refresh token replay or unknown token");
            return Err(AuthError::InvalidToken);
        }

        self.issue_tokens(&email).await
    }

    /// Invalidate a refresh token. Idempotent for tokens already rotated out;
    /// fails only when the token itself does not verify.
    #[tracing::instrument(skip(self, refresh_token))]
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let email = self.jwt.get_email_from_refresh_token(refresh_token)?;
        self.directory
            .remove_refresh_token(&email, refresh_token)
            .await?;
        tracing::info!("Logged out");
        Ok(())
    }

    /// Direct-login supplement: register a password account and grant tokens.
    pub async fn register(
        &self,
        email: &str,
        name: &str,
        password: &str,
    ) -> Result<(String, String), AuthError> {
        let user = self.directory.register(email, name, password).await?;
        self.issue_tokens(&user.email).await
    }

    /// Direct-login supplement: password check then token issuance.
    pub async fn password_login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(String, String), AuthError> {
        let user = self.directory.verify_password_login(email, password).await?;
        self.issue_tokens(&user.email).await
    }

    /// Periodic sweep: expired auth states, expired `state` bindings, expired
    /// codes. Concurrent lookups see each entry either fully present or fully
    /// absent; new flows are never blocked by the sweep.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup_expired_states(&self) {
        let removed = self.states.cleanup_expired();
        self.oauth_states.retain(|_, binding| !binding.is_expired());
        if let Err(e) = self.code_auth.purge_expired().await {
            tracing::warn!(error = %e, "Code store purge failed");
        }
        if removed > 0 {
            tracing::debug!(removed, "Swept expired auth states");
        }
    }

    pub fn pending_state_count(&self) -> usize {
        self.states.len()
    }
}
