//! Upstream OAuth provider capability.
//!
//! Each configured provider (GitHub, Yandex) implements one trait; the
//! authorization server resolves providers through a configuration-driven
//! registry, so adding a provider is a config entry plus an implementation,
//! not an inheritance chain. All transport failures and provider-reported
//! errors collapse into `AuthError::Provider`; the orchestration layer only
//! needs to know the exchange failed.

pub mod github;
pub mod yandex;

pub use github::GitHubProvider;
pub use yandex::YandexProvider;

use crate::config::ProvidersConfig;
use crate::error::AuthError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Profile data fetched from an upstream provider.
#[derive(Debug, Clone)]
pub struct ProviderUserInfo {
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
}

/// Token pair returned by an upstream provider's token endpoint.
#[derive(Debug, Clone)]
pub struct ProviderTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Authorization URL the browser is redirected to, carrying `state`.
    fn get_authorization_url(&self, state: &str) -> String;

    /// Exchange the callback `code` for provider tokens.
    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, AuthError>;

    /// Fetch the authenticated user's profile.
    async fn get_user_info(&self, access_token: &str) -> Result<ProviderUserInfo, AuthError>;

    /// Renew provider tokens with a provider refresh token.
    async fn refresh_access_token(&self, refresh_token: &str)
    -> Result<ProviderTokens, AuthError>;
}

/// Configuration-driven lookup of provider implementations.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn OAuthProvider>>,
}

impl ProviderRegistry {
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let mut providers: HashMap<String, Arc<dyn OAuthProvider>> = HashMap::new();
        if let Some(github) = &config.github {
            providers.insert(
                "github".to_string(),
                Arc::new(GitHubProvider::new(github.clone())),
            );
        }
        if let Some(yandex) = &config.yandex {
            providers.insert(
                "yandex".to_string(),
                Arc::new(YandexProvider::new(yandex.clone())),
            );
        }
        Self { providers }
    }

    /// Build a registry from pre-constructed providers. Used by tests to
    /// inject fakes and by embedders wiring custom providers.
    pub fn from_providers(providers: HashMap<String, Arc<dyn OAuthProvider>>) -> Self {
        Self { providers }
    }

    pub fn get(&self, provider_type: &str) -> Result<Arc<dyn OAuthProvider>, AuthError> {
        self.providers
            .get(provider_type)
            .cloned()
            .ok_or_else(|| AuthError::UnknownProvider(provider_type.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

/// Map a reqwest failure into the single provider error channel.
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> AuthError {
    AuthError::Provider(format!("{provider}: {err}"))
}
