use std::{env, fmt::Display, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub broker: BrokerConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expire_hours: i64,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Outbox relay is disabled when unset.
    pub amqp_url: Option<String>,
    pub poll_interval: Duration,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Reads the configuration from the process environment.
pub fn load() -> Result<Config> {
    load_from(|key| env::var(key).ok())
}

pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let vars = Vars { lookup: &lookup };

    Ok(Config {
        server: ServerConfig {
            host: vars.or("SERVER_HOST", "0.0.0.0".to_string())?,
            port: vars.or("SERVER_PORT", 3000)?,
        },
        database: DatabaseConfig {
            url: vars.required("DATABASE_URL")?,
            pool_size: vars.or("DATABASE_POOL_SIZE", 10)?,
        },
        auth: AuthConfig {
            jwt_secret: vars.required("JWT_SECRET")?,
            jwt_expire_hours: vars.or("JWT_EXPIRE_HOURS", 168)?,
        },
        broker: BrokerConfig {
            amqp_url: vars.optional("AMQP_URL"),
            poll_interval: Duration::from_secs(vars.or("OUTBOX_POLL_INTERVAL_SECS", 5)?),
        },
    })
}

struct Vars<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .ok_or_else(|| anyhow!("Environment variable {} must be set", key))
    }

    fn or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr + Display,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.optional(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
            None => {
                info!("{} not set, using default: {}", key, default);
                Ok(default)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = load_from(lookup(&[
            ("DATABASE_URL", "postgres://localhost/medtrax"),
            ("JWT_SECRET", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.server.address(), "0.0.0.0:3000");
        assert_eq!(config.database.pool_size, 10);
        assert_eq!(config.auth.jwt_expire_hours, 168);
        assert_eq!(config.broker.amqp_url, None);
        assert_eq!(config.broker.poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = load_from(lookup(&[
            ("DATABASE_URL", "postgres://db/medtrax"),
            ("JWT_SECRET", "secret"),
            ("SERVER_PORT", "8080"),
            ("AMQP_URL", "amqp://rabbit:5672"),
            ("OUTBOX_POLL_INTERVAL_SECS", "1"),
        ]))
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.broker.amqp_url.as_deref(), Some("amqp://rabbit:5672"));
        assert_eq!(config.broker.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_required() {
        let err = load_from(lookup(&[("DATABASE_URL", "postgres://db/medtrax")])).unwrap_err();
        assert_eq!(err.to_string(), "Environment variable JWT_SECRET must be set");
    }

    #[test]
    fn test_invalid_number() {
        let err = load_from(lookup(&[
            ("DATABASE_URL", "postgres://db/medtrax"),
            ("JWT_SECRET", "secret"),
            ("SERVER_PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(err.to_string().starts_with("Invalid value for SERVER_PORT"));
    }
}
