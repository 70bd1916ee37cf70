use dotenvy::dotenv;
use std::env;

/// Longest summary window accepted from the environment (100 years).
pub const MAX_SUMMARY_DAYS: i64 = 36_500;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub database_busy_timeout_ms: u64,
    // Window used by `smokelog summary` when no --from is given
    pub summary_default_days: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    /// In-memory store, used by tests and throwaway runs.
    pub fn in_memory() -> Self {
        Config {
            database_url: ":memory:".to_string(),
            database_busy_timeout_ms: 5000,
            summary_default_days: 7,
        }
    }

    fn build() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "data/smokelog.db".to_string());
        if database_url.trim().is_empty() {
            anyhow::bail!("DATABASE_URL must not be empty");
        }

        Ok(Config {
            database_url,
            database_busy_timeout_ms: env::var("DATABASE_BUSY_TIMEOUT_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .unwrap_or(5000),
            summary_default_days: env::var("SUMMARY_DEFAULT_DAYS")
                .unwrap_or_else(|_| "7".to_string())
                .parse()
                .ok()
                .filter(|days| (0..=MAX_SUMMARY_DAYS).contains(days))
                .unwrap_or(7),
        })
    }
}
