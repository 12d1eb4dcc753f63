//! The per-`login_token` authorization state table.
//!
//! States move `pending → granted | denied` exactly once; a terminal state is
//! immutable until the expiry sweep (or consumption) removes it. The table is
//! a `DashMap`, so transitions hold only the shard lock for the key they
//! touch - polling one `login_token` never blocks resolving another.

use dashmap::DashMap;
use serde::Serialize;
use std::time::Duration;
use time::OffsetDateTime;
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    Pending,
    Denied,
    Granted,
}

impl AuthStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AuthStatus::Pending)
    }
}

/// Correlation record for one asynchronous login flow.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct AuthState {
    #[serde(skip)]
    pub expires_at: OffsetDateTime,
    pub status: AuthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl AuthState {
    pub fn pending(ttl: Duration) -> Self {
        Self {
            expires_at: OffsetDateTime::now_utc() + ttl,
            status: AuthStatus::Pending,
            access_token: None,
            refresh_token: None,
        }
    }

    /// Synthetic terminal state for unknown or expired login tokens.
    pub fn denied() -> Self {
        Self {
            expires_at: OffsetDateTime::now_utc(),
            status: AuthStatus::Denied,
            access_token: None,
            refresh_token: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() > self.expires_at
    }
}

#[derive(Default)]
pub struct AuthStateTable {
    states: DashMap<String, AuthState>,
}

impl AuthStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh `pending` flow, replacing any previous state for the
    /// same `login_token` (a client restarting its flow starts over).
    pub fn insert_pending(&self, login_token: &str, ttl: Duration) {
        self.states
            .insert(login_token.to_string(), AuthState::pending(ttl));
    }

    /// Read the current state, lazily evicting it when expired.
    pub fn snapshot(&self, login_token: &str) -> Option<AuthState> {
        self.states.remove_if(login_token, |_, s| s.is_expired());
        self.states.get(login_token).map(|s| s.clone())
    }

    /// Transition `pending → granted`, storing the issued token pair.
    ///
    /// Returns false when the state is absent, expired or already terminal -
    /// the caller's flow lost the race (or came too late) and must not
    /// overwrite the winner.
    pub fn grant(&self, login_token: &str, access_token: String, refresh_token: String) -> bool {
        self.transition(login_token, |state| {
            state.status = AuthStatus::Granted;
            state.access_token = Some(access_token);
            state.refresh_token = Some(refresh_token);
        })
    }

    /// Transition `pending → denied`. Same exclusivity rules as `grant`.
    pub fn deny(&self, login_token: &str) -> bool {
        self.transition(login_token, |state| {
            state.status = AuthStatus::Denied;
        })
    }

    // get_mut holds the shard write lock, making check-then-set atomic per
    // key. Only a live pending state may be rewritten.
    fn transition(&self, login_token: &str, apply: impl FnOnce(&mut AuthState)) -> bool {
        match self.states.get_mut(login_token) {
            Some(mut entry) => {
                if entry.status.is_terminal() || entry.is_expired() {
                    return false;
                }
                apply(&mut entry);
                true
            }
            None => false,
        }
    }

    /// Bulk sweep removing every expired entry.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.states.len();
        self.states.retain(|_, state| !state.is_expired());
        before - self.states.len()
    }

    pub fn remove(&self, login_token: &str) {
        self.states.remove(login_token);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
