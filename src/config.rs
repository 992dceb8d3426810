use std::collections::HashMap;
use thiserror::Error;

/// Deployment environment; selects the bus delivery profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub server_port: u16,
    pub shutdown_timeout_secs: u64,
    pub db_path: String,
    pub db_max_conns: u32,
    pub bus_url: String,
    pub bus_client_id: String,
    pub bus_durable_prefix: String,
    pub bus_enabled: bool,
    pub jwt_secret: String,
    pub refresh_secret: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let environment = match env_map
            .get("ENVIRONMENT")
            .map(|s| s.as_str())
            .unwrap_or("development")
        {
            "development" | "dev" => Environment::Development,
            "production" | "prod" => Environment::Production,
            other => {
                return Err(ConfigError::InvalidValue(
                    "ENVIRONMENT".to_string(),
                    format!("must be development or production, got {}", other),
                ))
            }
        };

        let server_port = parse_with_default(&env_map, "SERVER_PORT", "8080")?;
        let shutdown_timeout_secs =
            parse_with_default(&env_map, "SERVER_SHUTDOWN_TIMEOUT_SECS", "30")?;

        let db_path = env_map
            .get("DB_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DB_PATH".to_string()))?;
        let db_max_conns = parse_with_default(&env_map, "DB_MAX_CONNS", "25")?;

        let bus_url = env_map
            .get("BUS_URL")
            .cloned()
            .unwrap_or_else(|| "nats://127.0.0.1:4222".to_string());
        let bus_client_id = env_map
            .get("BUS_CLIENT_ID")
            .cloned()
            .unwrap_or_else(|| "quantledger".to_string());
        let bus_durable_prefix = env_map
            .get("BUS_DURABLE_PREFIX")
            .cloned()
            .unwrap_or_else(|| "quantledger".to_string());
        let bus_enabled = match env_map
            .get("BUS_ENABLED")
            .map(|s| s.as_str())
            .unwrap_or("true")
        {
            "true" | "1" => true,
            "false" | "0" => false,
            other => {
                return Err(ConfigError::InvalidValue(
                    "BUS_ENABLED".to_string(),
                    format!("must be true or false, got {}", other),
                ))
            }
        };

        let jwt_secret = env_map
            .get("AUTH_JWT_SECRET")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("AUTH_JWT_SECRET".to_string()))?;
        let refresh_secret = env_map
            .get("AUTH_REFRESH_SECRET")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("AUTH_REFRESH_SECRET".to_string()))?;

        Ok(Config {
            environment,
            server_port,
            shutdown_timeout_secs,
            db_path,
            db_max_conns,
            bus_url,
            bus_client_id,
            bus_durable_prefix,
            bus_enabled,
            jwt_secret,
            refresh_secret,
        })
    }
}

fn parse_with_default<T: std::str::FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<T, ConfigError> {
    env_map
        .get(key)
        .map(|s| s.as_str())
        .unwrap_or(default)
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(key.to_string(), "failed to parse".to_string()))
}
