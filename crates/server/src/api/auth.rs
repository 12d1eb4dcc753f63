//! Auth API endpoints.
//!
//! The HTTP surface over the authorization server: both login paths, the
//! polling endpoint, token refresh/rotation and the direct-login supplement.

use crate::AppResources;
use crate::auth::{AuthServerHandle, AuthState};
use crate::error::AuthError;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

/// Tag for OpenAPI documentation.
pub const AUTH_TAG: &str = "Auth API";

/// Creates the auth router.
pub fn router(state: AuthServerHandle) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(initiate_oauth))
        .routes(routes!(oauth_callback))
        .routes(routes!(initiate_code))
        .routes(routes!(confirm_code))
        .routes(routes!(auth_status))
        .routes(routes!(refresh))
        .routes(routes!(logout))
        .routes(routes!(register))
        .routes(routes!(login))
        .with_state(state)
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let code = match &err {
            AuthError::UnknownProvider(_) => "unknown_provider",
            AuthError::Provider(_) => "provider_error",
            AuthError::InvalidToken => "invalid_token",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::EmailTaken => "email_taken",
            AuthError::StoreUnavailable(_) => "store_unavailable",
            AuthError::NotFound(_) => "not_found",
            AuthError::Database(_) | AuthError::TokenEncoding(_) => "server_error",
        };
        // Internal detail stays in the logs, not the response body.
        let description = match &err {
            AuthError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                None
            }
            AuthError::TokenEncoding(e) => {
                tracing::error!(error = %e, "Token encoding error");
                None
            }
            AuthError::StoreUnavailable(e) => {
                tracing::error!(error = %e, "Auth store unavailable");
                None
            }
            other => Some(other.to_string()),
        };
        Self {
            error: code.to_string(),
            error_description: description,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.as_str() {
            "invalid_token" | "invalid_credentials" => StatusCode::UNAUTHORIZED,
            "unknown_provider" | "email_taken" => StatusCode::BAD_REQUEST,
            "not_found" => StatusCode::NOT_FOUND,
            "provider_error" => StatusCode::BAD_GATEWAY,
            "store_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct InitiateOAuthParams {
    /// Correlation handle the client will poll with.
    pub login_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InitiateOAuthResponse {
    /// Provider URL to redirect the browser to.
    pub authorization_url: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InitiateCodeRequest {
    pub login_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InitiateCodeResponse {
    /// Short-lived single-use code to show the user.
    pub code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmCodeRequest {
    pub code: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct StatusParams {
    pub login_token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

// =============================================================================
// Endpoints
// =============================================================================

/// Start an OAuth login flow for a provider.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/oauth/{provider}/initiate",
    tag = AUTH_TAG,
    operation_id = "Initiate OAuth",
    summary = "Start an OAuth login flow",
    params(
        ("provider" = String, Path, description = "Provider name, e.g. `github` or `yandex`."),
        InitiateOAuthParams,
    ),
    responses(
        (status = 200, description = "Authorization URL to redirect the browser to", body = InitiateOAuthResponse),
        (status = 400, description = "Unknown provider", body = ApiError),
    )
)]
async fn initiate_oauth(
    State(state): State<AuthServerHandle>,
    Path(provider): Path<String>,
    Query(params): Query<InitiateOAuthParams>,
) -> Result<Json<InitiateOAuthResponse>, ApiError> {
    let authorization_url = state.initiate_oauth(&provider, &params.login_token)?;
    Ok(Json(InitiateOAuthResponse { authorization_url }))
}

/// OAuth provider callback.
///
/// Resolves the flow (or denies it) and sends the browser back to the
/// frontend, which relies on the original tab's polling to pick the outcome
/// up.
#[tracing::instrument(skip(state, resources, params))]
#[utoipa::path(
    get,
    path = "/oauth/{provider}/callback",
    tag = AUTH_TAG,
    operation_id = "OAuth Callback",
    summary = "Provider redirect target",
    params(
        ("provider" = String, Path, description = "Provider name."),
        CallbackParams,
    ),
    responses(
        (status = 303, description = "Redirect to the frontend"),
        (status = 400, description = "Unknown provider", body = ApiError),
    )
)]
async fn oauth_callback(
    State(state): State<AuthServerHandle>,
    Extension(resources): Extension<AppResources>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect, ApiError> {
    state
        .handle_oauth_callback(&provider, &params.code, &params.state, &params.error)
        .await?;
    Ok(Redirect::to(&format!(
        "{}/login/complete",
        resources.config.frontend_url
    )))
}

/// Start a code login flow.
#[tracing::instrument(skip(state, payload))]
#[utoipa::path(
    post,
    path = "/code/initiate",
    tag = AUTH_TAG,
    operation_id = "Initiate Code Auth",
    summary = "Start a secondary-channel code login flow",
    request_body = InitiateCodeRequest,
    responses(
        (status = 200, description = "Code to display to the user", body = InitiateCodeResponse),
        (status = 503, description = "Code store unavailable", body = ApiError),
    )
)]
async fn initiate_code(
    State(state): State<AuthServerHandle>,
    Json(payload): Json<InitiateCodeRequest>,
) -> Result<Json<InitiateCodeResponse>, ApiError> {
    let code = state.initiate_code_auth(&payload.login_token).await?;
    Ok(Json(InitiateCodeResponse { code }))
}

/// Confirm a login code from an authenticated second device.
#[tracing::instrument(skip(state, headers, payload))]
#[utoipa::path(
    post,
    path = "/code/confirm",
    tag = AUTH_TAG,
    operation_id = "Confirm Code",
    summary = "Resolve a pending code flow with the caller's identity",
    security(("Authorization" = [])),
    request_body = ConfirmCodeRequest,
    responses(
        (status = 204, description = "Flow resolved"),
        (status = 401, description = "Missing or invalid access token", body = ApiError),
        (status = 404, description = "Unknown or expired code", body = ApiError),
    )
)]
async fn confirm_code(
    State(state): State<AuthServerHandle>,
    headers: HeaderMap,
    Json(payload): Json<ConfirmCodeRequest>,
) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&headers).ok_or(AuthError::InvalidToken)?;
    let email = state.jwt().get_email_from_access_token(token)?;
    state.confirm_code(&payload.code, &email).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Poll the state of a login flow.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/status",
    tag = AUTH_TAG,
    operation_id = "Auth Status",
    summary = "Current state of a login flow",
    params(StatusParams),
    responses(
        (status = 200, description = "pending, denied or granted (with tokens)", body = AuthState),
    )
)]
async fn auth_status(
    State(state): State<AuthServerHandle>,
    Query(params): Query<StatusParams>,
) -> Json<AuthState> {
    Json(state.check_auth_status(&params.login_token))
}

/// Rotate a refresh token.
#[tracing::instrument(skip(state, payload))]
#[utoipa::path(
    post,
    path = "/refresh",
    tag = AUTH_TAG,
    operation_id = "Refresh Tokens",
    summary = "Exchange a refresh token for a new token pair",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Fresh token pair", body = TokenPairResponse),
        (status = 401, description = "Invalid, expired or rotated-out refresh token", body = ApiError),
    )
)]
async fn refresh(
    State(state): State<AuthServerHandle>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenPairResponse>, ApiError> {
    let (access_token, refresh_token) = state.refresh_tokens(&payload.refresh_token).await?;
    Ok(Json(TokenPairResponse {
        access_token,
        refresh_token,
    }))
}

/// Invalidate a refresh token.
#[tracing::instrument(skip(state, payload))]
#[utoipa::path(
    post,
    path = "/logout",
    tag = AUTH_TAG,
    operation_id = "Logout",
    summary = "Remove a refresh token from the valid set",
    request_body = RefreshRequest,
    responses(
        (status = 204, description = "Token invalidated"),
        (status = 401, description = "Token does not verify", body = ApiError),
    )
)]
async fn logout(
    State(state): State<AuthServerHandle>,
    Json(payload): Json<RefreshRequest>,
) -> Result<StatusCode, ApiError> {
    state.logout(&payload.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Register a direct-login account.
#[tracing::instrument(skip(state, payload), fields(email = %payload.email))]
#[utoipa::path(
    post,
    path = "/register",
    tag = AUTH_TAG,
    operation_id = "Register",
    summary = "Register with email and password",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Token pair for the new account", body = TokenPairResponse),
        (status = 400, description = "Email already registered", body = ApiError),
    )
)]
async fn register(
    State(state): State<AuthServerHandle>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<TokenPairResponse>, ApiError> {
    let (access_token, refresh_token) = state
        .register(&payload.email, &payload.name, &payload.password)
        .await?;
    Ok(Json(TokenPairResponse {
        access_token,
        refresh_token,
    }))
}

/// Direct login with email and password.
#[tracing::instrument(skip(state, payload), fields(email = %payload.email))]
#[utoipa::path(
    post,
    path = "/login",
    tag = AUTH_TAG,
    operation_id = "Login",
    summary = "Login with email and password",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token pair", body = TokenPairResponse),
        (status = 401, description = "Invalid email or password", body = ApiError),
    )
)]
async fn login(
    State(state): State<AuthServerHandle>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenPairResponse>, ApiError> {
    let (access_token, refresh_token) =
        state.password_login(&payload.email, &payload.password).await?;
    Ok(Json(TokenPairResponse {
        access_token,
        refresh_token,
    }))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
