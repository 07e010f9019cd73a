use std::env;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    /// When absent the service runs on the in-memory stores.
    pub mongo_uri: Option<String>,
    pub database_name: String,
    pub jwt_secret: String,
    pub bind_addr: String,
    pub frontend_origin: String,
    pub token_ttl_hours: i64,
    pub feed_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let parse_num = |name: &'static str, default: i64| -> Result<i64, ConfigError> {
            match lookup(name) {
                None => Ok(default),
                Some(value) => match value.parse::<i64>() {
                    Ok(n) if n > 0 => Ok(n),
                    _ => Err(ConfigError::Invalid { name, value }),
                },
            }
        };

        Ok(Self {
            mongo_uri: lookup("MONGO_URI").filter(|uri| !uri.is_empty()),
            database_name: lookup("DATABASE_NAME").unwrap_or_else(|| "todos".to_string()),
            jwt_secret: lookup("JWT_SECRET")
                .filter(|s| !s.is_empty())
                .ok_or(ConfigError::Missing("JWT_SECRET"))?,
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            frontend_origin: lookup("FRONTEND_ORIGIN")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            token_ttl_hours: parse_num("TOKEN_TTL_HOURS", 24)?,
            feed_capacity: parse_num("FEED_CAPACITY", 1024)? as usize,
        })
    }
}
