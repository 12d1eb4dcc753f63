//! Yandex OAuth provider.

use super::{OAuthProvider, ProviderTokens, ProviderUserInfo, transport_error};
use crate::config::ProviderConfig;
use crate::error::AuthError;
use async_trait::async_trait;
use serde::Deserialize;

const DEFAULT_AUTH_BASE: &str = "https://oauth.yandex.ru";
const DEFAULT_API_BASE: &str = "https://login.yandex.ru";

pub struct YandexProvider {
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
struct InfoBody {
    login: Option<String>,
    real_name: Option<String>,
    default_email: Option<String>,
    default_avatar_id: Option<String>,
}

impl YandexProvider {
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
            return Err(AuthError::Provider(format!("yandex: {error} {detail}")));
        }
        match body.access_token {
            Some(access_token) => Ok(ProviderTokens {
                access_token,
                refresh_token: body.refresh_token,
            }),
            None => Err(AuthError::Provider(
                "yandex: token response missing access_token".into(),
            )),
        }
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<ProviderTokens, AuthError> {
        let body: TokenBody = self
            .http
            .post(format!("{}/token", self.auth_base()))
            .form(form)
            .send()
            .await
            .map_err(|e| transport_error("yandex", e))?
            .error_for_status()
            .map_err(|e| transport_error("yandex", e))?
            .json()
            .await
            .map_err(|e| transport_error("yandex", e))?;
        Self::tokens_from_body(body)
    }
}

#[async_trait]
impl OAuthProvider for YandexProvider {
    fn get_authorization_url(&self, state: &str) -> String {
        format!(
            "{}/authorize?response_type=code&client_id={}&redirect_uri={}&state={}",
            self.auth_base(),
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(state),
        )
    }

    #[tracing::instrument(skip(self, code))]
    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, AuthError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ])
        .await
    }

    #[tracing::instrument(skip(self, access_token))]
    async fn get_user_info(&self, access_token: &str) -> Result<ProviderUserInfo, AuthError> {
        let info: InfoBody = self
            .http
            .get(format!("{}/info?format=json", self.api_base()))
            .header("Authorization", format!("OAuth {access_token}"))
            .send()
            .await
            .map_err(|e| transport_error("yandex", e))?
            .error_for_status()
            .map_err(|e| transport_error("yandex", e))?
            .json()
            .await
            .map_err(|e| transport_error("yandex", e))?;

        let email = info
            .default_email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AuthError::Provider("yandex: account has no email".into()))?;
        let name = info
            .real_name
            .or(info.login)
            .unwrap_or_else(|| email.clone());

        Ok(ProviderUserInfo {
            email,
            name,
            avatar_url: info.default_avatar_id.map(|id| {
                format!("https://avatars.yandex.net/get-yapic/{id}/islands-200")
            }),
        })
    }

    #[tracing::instrument(skip(self, refresh_token))]
    async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<ProviderTokens, AuthError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ])
        .await
    }
}
