//! SeaORM entities for the user directory.

pub mod permission;
pub mod refresh_token;
pub mod role;
pub mod user;
pub mod user_role;
