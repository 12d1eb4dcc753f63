//! GitHub OAuth provider.

use super::{OAuthProvider, ProviderTokens, ProviderUserInfo, transport_error};
use crate::config::ProviderConfig;
use crate::error::AuthError;
use async_trait::async_trait;
use serde::Deserialize;

const DEFAULT_AUTH_BASE: &str = "https://github.com";
const DEFAULT_API_BASE: &str = "https://api.github.com";

pub struct GitHubProvider {
    config: ProviderConfig,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct TokenBody {
    access_token: Option<String>,
    refresh_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct UserBody {
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Deserialize)]
struct EmailEntry {
    email: String,
    primary: bool,
    verified: bool,
}

impl GitHubProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn auth_base(&self) -> &str {
        self.config.auth_base_url.as_deref().unwrap_or(DEFAULT_AUTH_BASE)
    }

    fn api_base(&self) -> &str {
        self.config.api_base_url.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    fn tokens_from_body(body: TokenBody) -> Result<ProviderTokens, AuthError> {
        if let Some(error) = body.error {
            let detail = body.error_description.unwrap_or_default();
            return Err(AuthError::Provider(format!("github: {error} {detail}")));
        }
        match body.access_token {
            Some(access_token) => Ok(ProviderTokens {
                access_token,
                refresh_token: body.refresh_token,
            }),
            None => Err(AuthError::Provider(
                "github: token response missing access_token".into(),
            )),
        }
    }

    /// The `/user` profile hides the email when the user marks it private;
    /// `/user/emails` still lists it for the `user:email` scope.
    async fn primary_email(&self, access_token: &str) -> Result<String, AuthError> {
        let entries: Vec<EmailEntry> = self
            .http
            .get(format!("{}/user/emails", self.api_base()))
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .header("User-Agent", "platform-auth")
            .send()
            .await
            .map_err(|e| transport_error("github", e))?
            .error_for_status()
            .map_err(|e| transport_error("github", e))?
            .json()
            .await
            .map_err(|e| transport_error("github", e))?;

        entries
            .iter()
            .find(|e| e.primary && e.verified)
            .or_else(|| entries.first())
            .map(|e| e.email.clone())
            .ok_or_else(|| AuthError::Provider("github: account has no email".into()))
    }
}

#[async_trait]
impl OAuthProvider for GitHubProvider {
    fn get_authorization_url(&self, state: &str) -> String {
        format!(
            "{}/login/oauth/authorize?client_id={}&redirect_uri={}&state={}&scope={}",
            self.auth_base(),
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(state),
            urlencoding::encode("user:email"),
        )
    }

    #[tracing::instrument(skip(self, code))]
    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, AuthError> {
        let body: TokenBody = self
            .http
            .post(format!("{}/login/oauth/access_token", self.auth_base()))
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| transport_error("github", e))?
            .error_for_status()
            .map_err(|e| transport_error("github", e))?
            .json()
            .await
            .map_err(|e| transport_error("github", e))?;

        Self::tokens_from_body(body)
    }

    #[tracing::instrument(skip(self, access_token))]
    async fn get_user_info(&self, access_token: &str) -> Result<ProviderUserInfo, AuthError> {
        let user: UserBody = self
            .http
            .get(format!("{}/user", self.api_base()))
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .header("User-Agent", "platform-auth")
            .send()
            .await
            .map_err(|e| transport_error("github", e))?
            .error_for_status()
            .map_err(|e| transport_error("github", e))?
            .json()
            .await
            .map_err(|e| transport_error("github", e))?;

        let email = match user.email {
            Some(email) if !email.is_empty() => email,
            _ => self.primary_email(access_token).await?,
        };

        Ok(ProviderUserInfo {
            email,
            name: user.name.unwrap_or(user.login),
            avatar_url: user.avatar_url,
        })
    }

    #[tracing::instrument(skip(self, refresh_token))]
    async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<ProviderTokens, AuthError> {
        let body: TokenBody = self
            .http
            .post(format!("{}/login/oauth/access_token", self.auth_base()))
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| transport_error("github", e))?
            .error_for_status()
            .map_err(|e| transport_error("github", e))?
            .json()
            .await
            .map_err(|e| transport_error("github", e))?;

        Self::tokens_from_body(body)
    }
}
