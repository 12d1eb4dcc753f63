use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Credentials and endpoints for one upstream OAuth provider.
///
/// The base URLs default to the real provider endpoints; tests point them at
/// a local mock server.
#[derive(Clone, Debug, Deserialize)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub auth_base_url: Option<String>,
    #[serde(default)]
    pub api_base_url: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub github: Option<ProviderConfig>,
    #[serde(default)]
    pub yandex: Option<ProviderConfig>,
}

/// Lifetimes for the authorization state machine, all in seconds.
#[derive(Clone, Debug, Deserialize)]
pub struct AuthConfig {
    /// How long a pending login flow may stay unresolved.
    #[serde(default = "default_login_ttl")]
    pub login_ttl_secs: u64,
    /// Lifetime of a single-use login code.
    #[serde(default = "default_code_ttl")]
    pub code_ttl_secs: u64,
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_ttl_secs: default_login_ttl(),
            code_ttl_secs: default_code_ttl(),
            access_token_ttl_secs: default_access_ttl(),
            refresh_token_ttl_secs: default_refresh_ttl(),
        }
    }
}

fn default_login_ttl() -> u64 {
    600
}
fn default_code_ttl() -> u64 {
    300
}
fn default_access_ttl() -> u64 {
    60
}
fn default_refresh_ttl() -> u64 {
    60 * 60 * 24 * 7
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    pub frontend_url: String,
    /// HMAC secret for access/refresh token signing.
    pub jwt_secret: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Environment variable override convention: any var matching the key path
/// separated by double underscores (e.g. `AUTH__CODE_TTL_SECS`) overrides the
/// file value.
///
/// Returns a `ConfigError` instead of panicking so the caller can decide how
/// to fail.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml"))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    validate(&app)?;
    Ok(app)
}

fn validate(app: &AppConfig) -> Result<(), ConfigError> {
    if app.jwt_secret.len() < 32 {
        return Err(ConfigError::Validation(
            "jwt_secret must be at least 32 characters".into(),
        ));
    }
    if app.auth.code_ttl_secs == 0 || app.auth.login_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "auth TTLs must be greater than zero".into(),
        ));
    }
    if app.auth.code_ttl_secs > app.auth.login_ttl_secs {
        return Err(ConfigError::Validation(
            "code_ttl_secs must not exceed login_ttl_secs".into(),
        ));
    }
    Ok(())
}

/// Convenience helper for binaries wanting panic-on-error behaviour.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}
