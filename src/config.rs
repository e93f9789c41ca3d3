//! Server configuration loaded from the environment.
//!
//! `.env` is read first (via `dotenvy`) so local runs need no exported vars.

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;
const DEV_SECRET: &str = "insecure-dev-secret";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("JWT_SECRET (or SECRET_KEY) is required; set ALLOW_INSECURE_DEV_SECRET=1 for local runs")]
    MissingSecret,
    #[error("invalid {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// `None` runs the server on in-memory storage.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    /// Bounded outbound queue per connection.
    pub client_channel_capacity: usize,
    /// Allowed CORS origin. `None` allows any origin.
    pub frontend_url: Option<String>,
}

impl Config {
    /// Build from process environment.
    ///
    /// # Errors
    ///
    /// Fails without a signing secret or when a numeric variable is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = match lookup("JWT_SECRET").or_else(|| lookup("SECRET_KEY")) {
            Some(secret) if !secret.is_empty() => secret,
            _ if lookup("ALLOW_INSECURE_DEV_SECRET").is_some_and(|v| env_flag(&v)) => {
                tracing::warn!("using insecure development JWT secret");
                DEV_SECRET.to_owned()
            }
            _ => return Err(ConfigError::MissingSecret),
        };

        Ok(Self {
            port: parse_or(&lookup, "PORT", DEFAULT_PORT)?,
            database_url: lookup("DATABASE_URL").filter(|v| !v.is_empty()),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            jwt_secret,
            client_channel_capacity: parse_or(&lookup, "CLIENT_CHANNEL_CAPACITY", DEFAULT_CLIENT_CHANNEL_CAPACITY)?,
            frontend_url: lookup("FRONTEND_URL").filter(|v| !v.is_empty()),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn env_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
