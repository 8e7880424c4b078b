// Runtime configuration loaded from environment variables

use axum_extra::extract::cookie::SameSite;
use std::env;
use std::time::Duration;

const MIN_SECRET_LEN: usize = 32;

/// Errors raised while reading configuration at startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set in environment")]
    Missing(&'static str),

    #[error("{key} has an invalid value: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Settings for the refresh-token cookie
#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub name: String,
    pub secure: bool,
    pub same_site: SameSite,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    /// Access token lifetime in seconds
    pub access_token_ttl: i64,
    /// Refresh token lifetime in seconds
    pub refresh_token_ttl: i64,
    pub refresh_cookie: CookieConfig,
    pub cors_allowed_origins: Vec<String>,
    pub token_purge_interval: Duration,
}

impl Config {
    /// Read configuration from the process environment
    ///
    /// Call `dotenv::dotenv()` first to pick up a local `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = required("DATABASE_URL")?;

        let jwt_secret = required("JWT_SECRET")?;
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                key: "JWT_SECRET",
                reason: format!("must be at least {} bytes", MIN_SECRET_LEN),
            });
        }

        let access_token_ttl = parsed("ACCESS_TOKEN_TTL_SECS", 900i64)?;
        let refresh_token_ttl = parsed("REFRESH_TOKEN_TTL_SECS", 2_592_000i64)?;
        if access_token_ttl <= 0 || refresh_token_ttl <= access_token_ttl {
            return Err(ConfigError::Invalid {
                key: "REFRESH_TOKEN_TTL_SECS",
                reason: "token lifetimes must be positive and refresh must outlive access"
                    .to_string(),
            });
        }

        let same_site = match env::var("REFRESH_COOKIE_SAME_SITE") {
            Ok(value) => parse_same_site(&value)?,
            Err(_) => SameSite::Lax,
        };

        Ok(Self {
            database_url,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parsed("PORT", 8080u16)?,
            db_max_connections: parsed("DB_MAX_CONNECTIONS", 5u32)?,
            jwt_secret,
            access_token_ttl,
            refresh_token_ttl,
            refresh_cookie: CookieConfig {
                name: "refresh_token".to_string(),
                secure: bool_from_env("REFRESH_COOKIE_SECURE").unwrap_or(false),
                same_site,
            },
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .map(|value| parse_list(&value))
                .unwrap_or_default(),
            token_purge_interval: Duration::from_secs(parsed("TOKEN_PURGE_INTERVAL_SECS", 3600u64)?),
        })
    }

    /// Socket address string the server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn parsed<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn bool_from_env(key: &str) -> Option<bool> {
    env::var(key).ok().map(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn parse_same_site(value: &str) -> Result<SameSite, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "lax" => Ok(SameSite::Lax),
        "strict" => Ok(SameSite::Strict),
        "none" => Ok(SameSite::None),
        other => Err(ConfigError::Invalid {
            key: "REFRESH_COOKIE_SAME_SITE",
            reason: format!("expected lax, strict or none, got '{}'", other),
        }),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
