//! OpenAPI/Utoipa configuration.

use crate::api::{auth::AUTH_TAG, health::MISC_TAG};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

/// Security addon for OpenAPI documentation.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    #[tracing::instrument(skip(self, openapi))]
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            let bearer = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .bearer_format("JWT")
                .description(Some(
                    "Use an access token obtained from any of the login flows to authenticate.",
                ))
                .build();
            components.add_security_scheme("Authorization", SecurityScheme::Http(bearer));
        }
    }
}

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Platform Auth API",
        version = "1.0.0",
        description = "Credential issuance and validation service: OAuth and code-based \
                       login flows converging on a common JWT token pair."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = AUTH_TAG, description = "Login flows and token lifecycle endpoints")
    )
)]
pub struct ApiDoc;
