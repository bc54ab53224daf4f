//! Application settings loaded from environment variables.

use std::env;

use super::constants::{
    DEFAULT_DATABASE_URL, DEFAULT_READ_STORE_DB, DEFAULT_READ_STORE_URL, DEFAULT_REDIS_URL,
};

/// Application configuration
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub read_store_url: String,
    pub read_store_db: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("redis_url", &"[REDACTED]")
            .field("read_store_url", &"[REDACTED]")
            .field("read_store_db", &self.read_store_db)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string()),
            read_store_url: env::var("READ_STORE_URL")
                .unwrap_or_else(|_| DEFAULT_READ_STORE_URL.to_string()),
            read_store_db: env::var("READ_STORE_DB")
                .unwrap_or_else(|_| DEFAULT_READ_STORE_DB.to_string()),
        }
    }
}
