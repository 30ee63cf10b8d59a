/// Configuration management for the lendflow engine
///
/// Handles database connection, sweep cadence, mail relay and logging settings.
/// Every value can be overridden through `LENDFLOW_*` environment variables.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Deferred job sweep configuration
    pub sweep: SweepConfig,
    /// Outgoing mail configuration
    pub mail: MailConfig,
    /// Default tracing filter when RUST_LOG is not set
    pub log_filter: String,
}

/// SQLite connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL (e.g., "sqlite://data/lendflow.db")
    pub url: String,
    /// Maximum pooled connections
    pub max_connections: u32,
}

/// Periodic sweep settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Six-field cron expression (with seconds) for the sweep cadence
    pub schedule: String,
    /// Upper bound of jobs claimed per sweep
    pub batch_size: u32,
}

/// Mail dispatch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// HTTP relay endpoint. When unset, outgoing mail is only logged.
    pub relay_url: Option<String>,
    /// Sender address
    pub from: String,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: env_or("LENDFLOW_DATABASE_URL", "sqlite://data/lendflow.db"),
                max_connections: env_parse("LENDFLOW_DB_MAX_CONNECTIONS", 5),
            },
            sweep: SweepConfig {
                schedule: env_or("LENDFLOW_SWEEP_SCHEDULE", "0 * * * * *"),
                batch_size: env_parse("LENDFLOW_SWEEP_BATCH_SIZE", 100),
            },
            mail: MailConfig {
                relay_url: std::env::var("LENDFLOW_MAIL_RELAY_URL")
                    .ok()
                    .filter(|url| !url.trim().is_empty()),
                from: env_or("LENDFLOW_MAIL_FROM", "no-reply@lendflow.local"),
            },
            log_filter: env_or("LENDFLOW_LOG", "info"),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_on_garbage() {
        std::env::set_var("LENDFLOW_TEST_GARBAGE_NUMBER", "not-a-number");
        assert_eq!(env_parse("LENDFLOW_TEST_GARBAGE_NUMBER", 7u32), 7);
        std::env::remove_var("LENDFLOW_TEST_GARBAGE_NUMBER");
    }

    #[test]
    fn defaults_are_usable() {
        let config = Config::default();
        assert!(config.database.max_connections > 0);
        assert_eq!(config.sweep.schedule.split_whitespace().count(), 6);
    }
}
