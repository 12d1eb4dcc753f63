//! End-to-end tests for the authorization state machine.
//!
//! Exercises both login paths against an in-memory database: the code flow
//! from initiation through confirmation, the OAuth flow with a stubbed
//! provider, and the token refresh/rotation lifecycle.

use async_trait::async_trait;
use platform_auth::auth::{AuthStatus, AuthorizationServer, UserDirectory};
use platform_auth::code_auth::CodeAuthentication;
use platform_auth::config::AuthConfig;
use platform_auth::error::AuthError;
use platform_auth::jwt::JwtManager;
use platform_auth::providers::{
    OAuthProvider, ProviderRegistry, ProviderTokens, ProviderUserInfo,
};
use platform_auth::store::{MemoryStore, StoreError, TtlStore};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const TEST_SECRET: &str = "integration-test-secret-of-sufficient-length";

/// Create a test database with the auth tables.
async fn create_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.expect("connect");

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"CREATE TABLE user (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            password_hash TEXT NULL,
            created_at TEXT NOT NULL,
            last_login_at TEXT NULL
        );"#,
    ))
    .await
    .expect("create user table");

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"CREATE TABLE role (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );"#,
    ))
    .await
    .expect("create role table");

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"CREATE TABLE permission (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            role_id INTEGER NOT NULL,
            resource TEXT NOT NULL,
            action TEXT NOT NULL,
            scope TEXT NOT NULL,
            position INTEGER NOT NULL DEFAULT 0
        );"#,
    ))
    .await
    .expect("create permission table");

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"CREATE TABLE user_role (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            role_id INTEGER NOT NULL,
            assigned_at TEXT NOT NULL
        );"#,
    ))
    .await
    .expect("create user_role table");

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"CREATE TABLE refresh_token (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            token TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        );"#,
    ))
    .await
    .expect("create refresh_token table");

    db
}

/// Provider stub resolving every code to a fixed identity.
struct FakeProvider {
    email: String,
    fail_exchange: bool,
}

impl FakeProvider {
    fn for_email(email: &str) -> Self {
        Self {
            email: email.to_string(),
            fail_exchange: false,
        }
    }

    fn failing() -> Self {
        Self {
            email: String::new(),
            fail_exchange: true,
        }
    }
}

#[async_trait]
impl OAuthProvider for FakeProvider {
    fn get_authorization_url(&self, state: &str) -> String {
        format!("https://provider.test/authorize?client_id=fake&state={state}")
    }

    async fn exchange_code(&self, _code: &str) -> Result<ProviderTokens, AuthError> {
        if self.fail_exchange {
            return Err(AuthError::Provider("token endpoint rejected code".into()));
        }
        Ok(ProviderTokens {
            access_token: "provider-access".into(),
            refresh_token: None,
        })
    }

    async fn get_user_info(&self, _access_token: &str) -> Result<ProviderUserInfo, AuthError> {
        Ok(ProviderUserInfo {
            email: self.email.clone(),
            name: "Fake User".into(),
            avatar_url: None,
        })
    }

    async fn refresh_access_token(
        &self,
        _refresh_token: &str,
    ) -> Result<ProviderTokens, AuthError> {
        Ok(ProviderTokens {
            access_token: "provider-access-2".into(),
            refresh_token: None,
        })
    }
}

/// Store stub standing in for an unreachable backend.
struct FailingStore;

#[async_trait]
impl TtlStore for FailingStore {
    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn purge_expired(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

fn registry_with(provider: FakeProvider) -> ProviderRegistry {
    let mut providers: HashMap<String, Arc<dyn OAuthProvider>> = HashMap::new();
    providers.insert("github".to_string(), Arc::new(provider));
    ProviderRegistry::from_providers(providers)
}

fn build_server(
    db: Arc<DatabaseConnection>,
    registry: ProviderRegistry,
    store: Arc<dyn TtlStore>,
    auth_config: &AuthConfig,
) -> AuthorizationServer {
    let code_auth =
        CodeAuthentication::new(store, Duration::from_secs(auth_config.code_ttl_secs));
    let jwt = JwtManager::new(TEST_SECRET);
    let directory = UserDirectory::new(db);
    AuthorizationServer::new(registry, jwt, code_auth, directory, auth_config)
}

async fn default_server() -> AuthorizationServer {
    build_server(
        Arc::new(create_test_db().await),
        registry_with(FakeProvider::for_email("user@example.com")),
        Arc::new(MemoryStore::new()),
        &AuthConfig::default(),
    )
}

fn state_param(authorization_url: &str) -> String {
    let url = url::Url::parse(authorization_url).expect("valid url");
    url.query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .expect("state param present")
}

// =============================================================================
// Code flow
// =============================================================================

#[tokio::test]
async fn code_flow_grants_tokens() {
    let server = default_server().await;

    let code = server.initiate_code_auth("lt-code-1").await.expect("code");
    assert_eq!(code.len(), 6);
    assert_eq!(
        server.check_auth_status("lt-code-1").status,
        AuthStatus::Pending
    );

    server
        .confirm_code(&code, "tester@example.com")
        .await
        .expect("confirm");

    let state = server.check_auth_status("lt-code-1");
    assert_eq!(state.status, AuthStatus::Granted);
    let access = state.access_token.expect("access token");
    let refresh = state.refresh_token.expect("refresh token");

    let jwt = server.jwt();
    assert_eq!(
        jwt.get_email_from_access_token(&access).unwrap(),
        "tester@example.com"
    );
    assert!(jwt.verify_refresh_token(&refresh));

    // The user was provisioned on first login.
    let user = server
        .directory()
        .find_by_email("tester@example.com")
        .await
        .unwrap();
    assert!(user.is_some());
}

#[tokio::test]
async fn code_is_single_use() {
    let server = default_server().await;

    let code = server.initiate_code_auth("lt-code-2").await.expect("code");
    server
        .confirm_code(&code, "first@example.com")
        .await
        .expect("confirm");

    let second = server.confirm_code(&code, "second@example.com").await;
    assert!(matches!(second, Err(AuthError::NotFound(_))));

    // The flow keeps the outcome of the first confirmation.
    let state = server.check_auth_status("lt-code-2");
    assert_eq!(state.status, AuthStatus::Granted);
    assert_eq!(
        server
            .jwt()
            .get_email_from_access_token(&state.access_token.unwrap())
            .unwrap(),
        "first@example.com"
    );
}

#[tokio::test]
async fn unknown_code_is_not_found() {
    let server = default_server().await;
    let result = server.confirm_code("ZZZZZZ", "tester@example.com").await;
    assert!(matches!(result, Err(AuthError::NotFound(_))));
}

#[tokio::test]
async fn unknown_login_token_reports_denied() {
    let server = default_server().await;
    let state = server.check_auth_status("never-initiated");
    assert_eq!(state.status, AuthStatus::Denied);
    assert!(state.access_token.is_none());
    assert!(state.refresh_token.is_none());
}

#[tokio::test]
async fn code_store_outage_fails_closed() {
    let server = build_server(
        Arc::new(create_test_db().await),
        registry_with(FakeProvider::for_email("user@example.com")),
        Arc::new(FailingStore),
        &AuthConfig::default(),
    );

    let result = server.initiate_code_auth("lt-outage").await;
    assert!(matches!(result, Err(AuthError::StoreUnavailable(_))));

    // No pending flow is left behind for a code that was never issued.
    assert_eq!(
        server.check_auth_status("lt-outage").status,
        AuthStatus::Denied
    );
}

#[tokio::test]
async fn failed_grant_denies_code_flow() {
    let db = Arc::new(create_test_db().await);
    let server = build_server(
        db.clone(),
        registry_with(FakeProvider::for_email("user@example.com")),
        Arc::new(MemoryStore::new()),
        &AuthConfig::default(),
    );

    let code = server.initiate_code_auth("lt-grant-fail").await.expect("code");

    // Break token issuance underneath the confirmation.
    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        "DROP TABLE refresh_token",
    ))
    .await
    .expect("drop refresh_token");

    let result = server.confirm_code(&code, "tester@example.com").await;
    assert!(result.is_err());

    // The poller sees a resolved flow, not one stuck pending until TTL.
    assert_eq!(
        server.check_auth_status("lt-grant-fail").status,
        AuthStatus::Denied
    );

    // The code was retired regardless of the failure.
    let retry = server.confirm_code(&code, "tester@example.com").await;
    assert!(matches!(retry, Err(AuthError::NotFound(_))));
}

// =============================================================================
// OAuth flow
// =============================================================================

#[tokio::test]
async fn oauth_flow_grants_tokens() {
    let server = default_server().await;

    let url = server
        .initiate_oauth("github", "lt-oauth-1")
        .expect("authorization url");
    assert!(url.starts_with("https://provider.test/authorize"));
    let state = state_param(&url);

    assert_eq!(
        server.check_auth_status("lt-oauth-1").status,
        AuthStatus::Pending
    );

    server
        .handle_oauth_callback("github", "cb-code", &state, "")
        .await
        .expect("callback");

    let auth_state = server.check_auth_status("lt-oauth-1");
    assert_eq!(auth_state.status, AuthStatus::Granted);
    assert_eq!(
        server
            .jwt()
            .get_email_from_access_token(&auth_state.access_token.unwrap())
            .unwrap(),
        "user@example.com"
    );
}

#[tokio::test]
async fn oauth_unknown_provider_is_rejected() {
    let server = default_server().await;
    let result = server.initiate_oauth("gitlab", "lt-unknown");
    assert!(matches!(result, Err(AuthError::UnknownProvider(_))));
}

#[tokio::test]
async fn oauth_error_param_denies_flow() {
    let server = default_server().await;

    let url = server.initiate_oauth("github", "lt-oauth-2").expect("url");
    let state = state_param(&url);

    server
        .handle_oauth_callback("github", "", &state, "access_denied")
        .await
        .expect("callback");

    assert_eq!(
        server.check_auth_status("lt-oauth-2").status,
        AuthStatus::Denied
    );
}

#[tokio::test]
async fn oauth_unknown_state_leaves_pending_flow_alone() {
    let server = default_server().await;

    server.initiate_oauth("github", "lt-oauth-3").expect("url");

    server
        .handle_oauth_callback("github", "cb-code", "forged-state", "")
        .await
        .expect("callback is a no-op");

    assert_eq!(
        server.check_auth_status("lt-oauth-3").status,
        AuthStatus::Pending
    );
}

#[tokio::test]
async fn oauth_callback_replay_is_a_noop() {
    let server = default_server().await;

    let url = server.initiate_oauth("github", "lt-oauth-4").expect("url");
    let state = state_param(&url);

    server
        .handle_oauth_callback("github", "cb-code", &state, "")
        .await
        .expect("first callback");
    let first = server.check_auth_status("lt-oauth-4");
    assert_eq!(first.status, AuthStatus::Granted);

    server
        .handle_oauth_callback("github", "cb-code", &state, "")
        .await
        .expect("replay");
    let second = server.check_auth_status("lt-oauth-4");
    assert_eq!(second.status, AuthStatus::Granted);
    assert_eq!(first.access_token, second.access_token);
}

#[tokio::test]
async fn oauth_provider_failure_denies_flow() {
    let server = build_server(
        Arc::new(create_test_db().await),
        registry_with(FakeProvider::failing()),
        Arc::new(MemoryStore::new()),
        &AuthConfig::default(),
    );

    let url = server.initiate_oauth("github", "lt-oauth-5").expect("url");
    let state = state_param(&url);

    // Upstream failure resolves the flow rather than erroring the callback.
    server
        .handle_oauth_callback("github", "cb-code", &state, "")
        .await
        .expect("callback");

    assert_eq!(
        server.check_auth_status("lt-oauth-5").status,
        AuthStatus::Denied
    );
}

// =============================================================================
// Token lifecycle
// =============================================================================

#[tokio::test]
async fn refresh_rotates_and_detects_reuse() {
    let server = default_server().await;

    let (_, refresh1) = server
        .register("rotate@example.com", "Rotate", "hunter2hunter2")
        .await
        .expect("register");

    let (access2, refresh2) = server.refresh_tokens(&refresh1).await.expect("rotate");
    assert!(server.jwt().verify_access_token(&access2));

    // The rotated-out token is no longer in the valid set.
    let reuse = server.refresh_tokens(&refresh1).await;
    assert!(matches!(reuse, Err(AuthError::InvalidToken)));

    // The replacement still works.
    server.refresh_tokens(&refresh2).await.expect("rotate again");
}

#[tokio::test]
async fn concurrent_rotation_has_exactly_one_winner() {
    let server = default_server().await;

    // Two clients racing to spend the same refresh token. The row delete is
    // the membership check, so at most one of them can rotate.
    for round in 0..20 {
        let (_, refresh) = server
            .register(&format!("race{round}@example.com"), "Race", "hunter2hunter2")
            .await
            .expect("register");

        let (a, b) = tokio::join!(
            server.refresh_tokens(&refresh),
            server.refresh_tokens(&refresh)
        );
        assert_eq!(
            a.is_ok() as u8 + b.is_ok() as u8,
            1,
            "exactly one rotation may win, round {round}: {a:?} vs {b:?}"
        );
        let loser = if a.is_err() { a } else { b };
        assert!(matches!(loser, Err(AuthError::InvalidToken)));
    }
}

#[tokio::test]
async fn logout_invalidates_refresh_token() {
    let server = default_server().await;

    let (_, refresh) = server
        .register("leave@example.com", "Leave", "hunter2hunter2")
        .await
        .expect("register");

    server.logout(&refresh).await.expect("logout");
    let after = server.refresh_tokens(&refresh).await;
    assert!(matches!(after, Err(AuthError::InvalidToken)));

    // A token that never verifies is rejected outright.
    let garbage = server.logout("not-a-jwt").await;
    assert!(matches!(garbage, Err(AuthError::InvalidToken)));
}

#[tokio::test]
async fn password_login_lifecycle() {
    let server = default_server().await;

    server
        .register("direct@example.com", "Direct", "correct-horse")
        .await
        .expect("register");

    let duplicate = server
        .register("direct@example.com", "Again", "other-pass")
        .await;
    assert!(matches!(duplicate, Err(AuthError::EmailTaken)));

    let (access, _) = server
        .password_login("direct@example.com", "correct-horse")
        .await
        .expect("login");
    assert_eq!(
        server.jwt().get_email_from_access_token(&access).unwrap(),
        "direct@example.com"
    );

    let wrong = server.password_login("direct@example.com", "wrong").await;
    assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));

    let unknown = server.password_login("nobody@example.com", "whatever").await;
    assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));
}

#[tokio::test]
async fn refresh_picks_up_new_role_permissions() {
    let db = Arc::new(create_test_db().await);
    let server = build_server(
        db.clone(),
        registry_with(FakeProvider::for_email("user@example.com")),
        Arc::new(MemoryStore::new()),
        &AuthConfig::default(),
    );

    let (access1, refresh1) = server
        .register("grow@example.com", "Grow", "hunter2hunter2")
        .await
        .expect("register");
    assert!(
        server
            .jwt()
            .get_permissions_from_access_token(&access1)
            .unwrap()
            .is_empty()
    );

    create_role_fixture(db.as_ref()).await;
    server
        .directory()
        .assign_role("grow@example.com", "runner")
        .await
        .expect("assign role");

    let (access2, _) = server.refresh_tokens(&refresh1).await.expect("rotate");
    let permissions = server
        .jwt()
        .get_permissions_from_access_token(&access2)
        .unwrap();
    assert_eq!(permissions, vec!["suite:run", "report:read"]);
}

/// Seed a `runner` role with two ordered permissions.
async fn create_role_fixture(db: &DatabaseConnection) {
    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"INSERT INTO role (name) VALUES ('runner');"#,
    ))
    .await
    .expect("insert role");
    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"INSERT INTO permission (role_id, resource, action, scope, position) VALUES
            (1, 'suite', 'run', 'own', 0),
            (1, 'report', 'read', 'own', 1);"#,
    ))
    .await
    .expect("insert permissions");
}

// =============================================================================
// Expiry
// =============================================================================

#[tokio::test]
async fn expired_flows_are_swept() {
    let auth_config = AuthConfig {
        login_ttl_secs: 1,
        code_ttl_secs: 1,
        ..AuthConfig::default()
    };
    let server = build_server(
        Arc::new(create_test_db().await),
        registry_with(FakeProvider::for_email("user@example.com")),
        Arc::new(MemoryStore::new()),
        &auth_config,
    );

    let code = server.initiate_code_auth("lt-expire").await.expect("code");
    assert_eq!(server.pending_state_count(), 1);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    // An expired pending flow reads as denied even before the sweep.
    assert_eq!(
        server.check_auth_status("lt-expire").status,
        AuthStatus::Denied
    );

    server.cleanup_expired_states().await;
    assert_eq!(server.pending_state_count(), 0);

    let late = server.confirm_code(&code, "late@example.com").await;
    assert!(matches!(late, Err(AuthError::NotFound(_))));
}
