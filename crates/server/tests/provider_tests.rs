//! OAuth provider tests against mocked upstream endpoints.

use platform_auth::config::ProviderConfig;
use platform_auth::error::AuthError;
use platform_auth::providers::{GitHubProvider, OAuthProvider, YandexProvider};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider_config(mock: &MockServer) -> ProviderConfig {
    ProviderConfig {
        client_id: "test-client".into(),
        client_secret: "test-secret".into(),
        redirect_uri: "https://platform.example/cb".into(),
        auth_base_url: Some(mock.uri()),
        api_base_url: Some(mock.uri()),
    }
}

// =============================================================================
// GitHub
// =============================================================================

#[tokio::test]
async fn github_exchange_and_user_info() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .and(body_string_contains("client_id=test-client"))
        .and(body_string_contains("code=cb-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "gh-access",
            "token_type": "bearer",
            "scope": "user:email"
        })))
        .expect(1)
        .mount(&mock)
        .await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .and(header("authorization", "Bearer gh-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "login": "octocat",
            "name": "Octo Cat",
            "email": "octo@example.com",
            "avatar_url": "https://avatars.example/octocat"
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let provider = GitHubProvider::new(provider_config(&mock));

    let tokens = provider.exchange_code("cb-code").await.expect("exchange");
    assert_eq!(tokens.access_token, "gh-access");
    assert!(tokens.refresh_token.is_none());

    let info = provider
        .get_user_info(&tokens.access_token)
        .await
        .expect("user info");
    assert_eq!(info.email, "octo@example.com");
    assert_eq!(info.name, "Octo Cat");
    assert_eq!(
        info.avatar_url.as_deref(),
        Some("https://avatars.example/octocat")
    );
}

#[tokio::test]
async fn github_private_email_falls_back_to_emails_endpoint() {
    let mock = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "login": "octocat",
            "name": null,
            "email": null,
            "avatar_url": null
        })))
        .mount(&mock)
        .await;

    Mock::given(method("GET"))
        .and(path("/user/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "email": "secondary@example.com", "primary": false, "verified": true },
            { "email": "primary@example.com", "primary": true, "verified": true }
        ])))
        .expect(1)
        .mount(&mock)
        .await;

    let provider = GitHubProvider::new(provider_config(&mock));
    let info = provider.get_user_info("gh-access").await.expect("user info");

    assert_eq!(info.email, "primary@example.com");
    // No display name on the profile, the login stands in.
    assert_eq!(info.name, "octocat");
}

#[tokio::test]
async fn github_token_error_body_is_a_provider_error() {
    let mock = MockServer::start().await;

    // GitHub reports errors with a 200 status and an error body.
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "bad_verification_code",
            "error_description": "The code passed is incorrect or expired."
        })))
        .mount(&mock)
        .await;

    let provider = GitHubProvider::new(provider_config(&mock));
    let result = provider.exchange_code("stale-code").await;
    assert!(matches!(
        result,
        Err(AuthError::Provider(msg)) if msg.contains("bad_verification_code")
    ));
}

#[tokio::test]
async fn github_http_failure_is_a_provider_error() {
    let mock = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock)
        .await;

    let provider = GitHubProvider::new(provider_config(&mock));
    let result = provider.get_user_info("gh-access").await;
    assert!(matches!(result, Err(AuthError::Provider(_))));
}

// =============================================================================
// Yandex
// =============================================================================

#[tokio::test]
async fn yandex_exchange_and_user_info() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya-access",
            "refresh_token": "ya-refresh",
            "token_type": "bearer"
        })))
        .expect(1)
        .mount(&mock)
        .await;

    Mock::given(method("GET"))
        .and(path("/info"))
        .and(query_param("format", "json"))
        .and(header("authorization", "OAuth ya-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "login": "yauser",
            "real_name": "Ya User",
            "default_email": "yauser@example.com",
            "default_avatar_id": "31804/abcdef"
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let provider = YandexProvider::new(provider_config(&mock));

    let tokens = provider.exchange_code("cb-code").await.expect("exchange");
    assert_eq!(tokens.access_token, "ya-access");
    assert_eq!(tokens.refresh_token.as_deref(), Some("ya-refresh"));

    let info = provider
        .get_user_info(&tokens.access_token)
        .await
        .expect("user info");
    assert_eq!(info.email, "yauser@example.com");
    assert_eq!(info.name, "Ya User");
    assert_eq!(
        info.avatar_url.as_deref(),
        Some("https://avatars.yandex.net/get-yapic/31804/abcdef/islands-200")
    );
}

#[tokio::test]
async fn yandex_missing_email_is_a_provider_error() {
    let mock = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "login": "yauser",
            "real_name": null,
            "default_email": null,
            "default_avatar_id": null
        })))
        .mount(&mock)
        .await;

    let provider = YandexProvider::new(provider_config(&mock));
    let result = provider.get_user_info("ya-access").await;
    assert!(matches!(
        result,
        Err(AuthError::Provider(msg)) if msg.contains("no email")
    ));
}

#[tokio::test]
async fn yandex_refresh_rotates_provider_tokens() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=ya-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya-access-2",
            "refresh_token": "ya-refresh-2"
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let provider = YandexProvider::new(provider_config(&mock));
    let tokens = provider
        .refresh_access_token("ya-refresh")
        .await
        .expect("refresh");
    assert_eq!(tokens.access_token, "ya-access-2");
    assert_eq!(tokens.refresh_token.as_deref(), Some("ya-refresh-2"));
}
