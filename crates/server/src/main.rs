use platform_auth::AppResources;
use platform_auth::api::start_webserver;
use platform_auth::auth::{AuthorizationServer, UserDirectory};
use platform_auth::code_auth::CodeAuthentication;
use platform_auth::config::load_config_or_panic;
use platform_auth::jwt::JwtManager;
use platform_auth::providers::ProviderRegistry;
use platform_auth::store::MemoryStore;
use sea_orm::Database;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_tracing() {
    let default_directives = "platform_auth=info,hyper=warn,sea_orm=info";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install().expect("Failed to install `color_eyre::install`");
    dotenvy::dotenv().ok();

    initialize_tracing();

    // Load config
    let config = Arc::new(load_config_or_panic());

    // Set up SeaORM database connection
    let db = Arc::new(
        Database::connect(&config.database_url)
            .await
            .expect("Failed to connect to database"),
    );

    let store = Arc::new(MemoryStore::new());
    let code_auth = CodeAuthentication::new(
        store,
        Duration::from_secs(config.auth.code_ttl_secs),
    );
    let jwt = JwtManager::new(&config.jwt_secret);
    let providers = ProviderRegistry::from_config(&config.providers);
    tracing::info!(providers = ?providers.names(), "configured oauth providers");
    let directory = UserDirectory::new(db.clone());

    let server = Arc::new(AuthorizationServer::new(
        providers,
        jwt,
        code_auth,
        directory,
        &config.auth,
    ));

    // Periodic sweep of expired login flows and codes
    {
        let server = server.clone();
        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                server.cleanup_expired_states().await;
            }
        });
    }

    let resources = AppResources { db, config };
    start_webserver(server, resources).await?;
    Ok(())
}
