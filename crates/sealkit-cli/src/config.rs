//! CLI configuration.
//!
//! Secrets are read from the environment only, never from arguments, so they
//! stay out of shell history and process listings.

use anyhow::{Result, bail};
use sealkit_core::{Kek, ManagerOptions};

/// Settings for one CLI invocation.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// `PostgreSQL` connection string.
    pub database_url: Option<String>,
    /// Current master key.
    pub kek: Option<Kek>,
    /// Replacement master key for `rewrap-kek`.
    pub new_kek: Option<Kek>,
    /// Log filter (e.g. `warn`, `sealkit_core=debug`).
    pub log_level: String,
    /// Retries after a version conflict.
    pub update_retries: u32,
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` — `PostgreSQL` connection string
    /// - `SEALKIT_KEK` — current master key
    /// - `SEALKIT_NEW_KEK` — replacement master key (for `rewrap-kek`)
    /// - `SEALKIT_LOG_LEVEL` — log filter (default: `warn`)
    /// - `SEALKIT_UPDATE_RETRIES` — conflict retries (default: `3`)
    #[must_use]
    pub fn from_env() -> Self {
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let update_retries = std::env::var("SEALKIT_UPDATE_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(ManagerOptions::default().max_update_retries);

        Self {
            database_url: non_empty("DATABASE_URL"),
            kek: non_empty("SEALKIT_KEK").map(Kek::new),
            new_kek: non_empty("SEALKIT_NEW_KEK").map(Kek::new),
            log_level: std::env::var("SEALKIT_LOG_LEVEL").unwrap_or_else(|_| "warn".to_owned()),
            update_retries,
        }
    }

    /// Apply command-line overrides.
    #[must_use]
    pub fn with_overrides(mut self, database_url: Option<String>, log_level: Option<String>) -> Self {
        if database_url.is_some() {
            self.database_url = database_url;
        }
        if let Some(level) = log_level {
            self.log_level = level;
        }
        self
    }

    pub fn options(&self) -> ManagerOptions {
        ManagerOptions {
            max_update_retries: self.update_retries,
        }
    }

    /// # Errors
    ///
    /// Fails if `SEALKIT_KEK` is unset or empty.
    pub fn require_kek(&self) -> Result<Kek> {
        match &self.kek {
            Some(kek) => Ok(kek.clone()),
            None => bail!("SEALKIT_KEK is not set"),
        }
    }

    /// # Errors
    ///
    /// Fails if `SEALKIT_NEW_KEK` is unset or empty.
    pub fn require_new_kek(&self) -> Result<Kek> {
        match &self.new_kek {
            Some(kek) => Ok(kek.clone()),
            None => bail!("SEALKIT_NEW_KEK is not set"),
        }
    }

    /// # Errors
    ///
    /// Fails if no database URL was given.
    pub fn require_database_url(&self) -> Result<&str> {
        match &self.database_url {
            Some(url) => Ok(url),
            None => bail!("DATABASE_URL is not set (or pass --database-url)"),
        }
    }
}
