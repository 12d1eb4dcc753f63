//! API module providing the HTTP endpoints of the auth service.
//!
//! This module is organized into submodules:
//! - `auth` - Login flow and token lifecycle endpoints (/api/auth/*)
//! - `health` - Health check endpoint (/healthz)
//! - `openapi` - OpenAPI/Utoipa configuration

pub mod auth;
pub mod health;
pub mod openapi;

pub use auth::AUTH_TAG;
pub use health::MISC_TAG;

use crate::AppResources;
use crate::auth::AuthServerHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_redoc::{Redoc, Servable};

/// Starts the web server with all configured routes.
#[tracing::instrument(skip(auth_state, app_resources))]
pub async fn start_webserver(
    auth_state: AuthServerHandle,
    app_resources: AppResources,
) -> color_eyre::Result<()> {
    let listen_addr = app_resources.config.listen_addr.clone();

    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .nest("/api/auth", auth::router(auth_state))
        .routes(routes!(health::health))
        .layer(axum::Extension(app_resources))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .split_for_parts();

    let router = router.merge(Redoc::with_url("/api-docs", api));

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(addr = %listen_addr, "Server running");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    Ok(())
}
