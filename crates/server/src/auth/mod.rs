//! Authorization core: the state machine correlating anonymous browser
//! sessions with asynchronous authentication events.
//!
//! ## Flow
//!
//! 1. A client obtains a `login_token` and either starts an OAuth redirect
//!    (`initiate_oauth`) or a secondary-channel code flow
//!    (`initiate_code_auth`).
//! 2. The OAuth callback or a code confirmation resolves an identity and
//!    moves the flow's `AuthState` from `pending` to a terminal
//!    `granted`/`denied` exactly once.
//! 3. The client polls `check_auth_status` until it observes the terminal
//!    state and collects its token pair.

pub mod directory;
pub mod password;
pub mod server;
pub mod state;

pub use directory::UserDirectory;
pub use password::{hash_password, verify_password};
pub use server::AuthorizationServer;

/// Shared handle the API layer keeps in its router state.
pub type AuthServerHandle = std::sync::Arc<AuthorizationServer>;
pub use state::{AuthState, AuthStatus, AuthStateTable};
