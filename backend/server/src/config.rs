//! Application configuration loaded from environment variables.

use crate::errors::{Result, ServerError};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// How often (in seconds) the cause-expiry sweep runs (daily by default)
    pub sweep_interval_secs: u64,
    /// Whether the minimum-donation check is enforced at startup
    pub min_donation_enabled: Option<bool>,
    /// Startup override for the minimum donation amount (minor units)
    pub min_donation_amount: Option<i64>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./donations.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| ServerError::Config("Invalid API_PORT".to_string()))?,
            sweep_interval_secs: env_var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .map_err(|_| ServerError::Config("Invalid SWEEP_INTERVAL_SECS".to_string()))?,
            min_donation_enabled: match env_var("MIN_DONATION_ENABLED") {
                Ok(v) => Some(v.parse().map_err(|_| {
                    ServerError::Config("Invalid MIN_DONATION_ENABLED".to_string())
                })?),
                Err(_) => None,
            },
            min_donation_amount: match env_var("MIN_DONATION_AMOUNT") {
                Ok(v) => Some(v.parse().map_err(|_| {
                    ServerError::Config("Invalid MIN_DONATION_AMOUNT".to_string())
                })?),
                Err(_) => None,
            },
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| ServerError::Config(format!("Missing env var: {key}")))
}
