use thiserror::Error;

/// Failures surfaced by the authorization core.
///
/// Provider and store failures that happen inside an asynchronous login flow
/// are caught at the orchestration boundary and turned into a `denied`
/// authorization state; the variants here are what the synchronous call
/// paths (`refresh_tokens`, `logout`, code confirmation) return directly.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unknown OAuth provider: {0}")]
    UnknownProvider(String),
    #[error("OAuth provider error: {0}")]
    Provider(String),
    #[error("invalid token")]
    InvalidToken,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("email already registered")]
    EmailTaken,
    #[error("auth store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("token encoding failed: {0}")]
    TokenEncoding(#[from] jsonwebtoken::errors::Error),
}

impl AuthError {
    /// True for failures that deny a pending login flow rather than abort it.
    ///
    /// An unreachable store must *not* be treated this way: outage may never
    /// look like a successful or merely-invalid code.
    pub fn denies_flow(&self) -> bool {
        matches!(
            self,
            AuthError::Provider(_) | AuthError::InvalidToken | AuthError::NotFound(_)
        )
    }
}
