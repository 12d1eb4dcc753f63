//! Credential issuance and validation service for a testing platform.
//!
//! Two login paths, delegated OAuth (GitHub, Yandex) and a short-lived
//! numeric-code flow, converge on a common JWT token pair. A shared
//! authorization state machine correlates the anonymous session that started
//! a flow with the authentication event that resolves it.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::AppConfig;

pub mod api;
pub mod auth;
pub mod code_auth;
pub mod config;
pub mod entity;
pub mod error;
pub mod jwt;
pub mod providers;
pub mod store;

#[derive(Clone, Debug)]
pub struct AppResources {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
}
