//! Store configuration loaded from the environment.

use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::resolution::DEFAULT_BATCH_SIZE;

/// Connection and tuning settings.
///
/// | Variable | Default |
/// |----------|---------|
/// | `DATABASE_URL` | composed from the `DB_*` parts |
/// | `DB_HOST` / `DB_PORT` | `127.0.0.1` / `5432` |
/// | `DB_USER` / `DB_PASSWORD` / `DB_DATABASE` | `postgres` / empty / `a11n` |
/// | `DB_POOL_MIN_SIZE` / `DB_POOL_MAX_SIZE` | `1` / `10` |
/// | `DB_ACQUIRE_TIMEOUT_SECS` | `5` |
/// | `A11N_CURSOR_BATCH_SIZE` | `100` |
/// | `A11N_TOKEN_TTL_SECS` | `300` |
///
/// The last two reach the services through [`RoleResolution::from_config`]
/// and [`TokenService::from_config`].
///
/// [`RoleResolution::from_config`]: crate::resolution::RoleResolution::from_config
/// [`TokenService::from_config`]: crate::tokens::TokenService::from_config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: String,
    pub pool_min_size: u32,
    pub pool_max_size: u32,
    pub acquire_timeout: StdDuration,
    pub cursor_batch_size: usize,
    pub token_ttl: chrono::Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: compose_url("127.0.0.1", 5432, "postgres", "", "a11n"),
            pool_min_size: 1,
            pool_max_size: 10,
            acquire_timeout: StdDuration::from_secs(5),
            cursor_batch_size: DEFAULT_BATCH_SIZE,
            token_ttl: a11n_auth::default_token_ttl(),
        }
    }
}

fn compose_url(host: &str, port: u16, user: &str, password: &str, database: &str) -> String {
    if password.is_empty() {
        format!("postgres://{user}@{host}:{port}/{database}")
    } else {
        format!("postgres://{user}:{password}@{host}:{port}/{database}")
    }
}

fn parsed<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let database_url = match lookup("DATABASE_URL") {
            Some(url) => url,
            None => compose_url(
                &text("DB_HOST", "127.0.0.1"),
                parsed(&lookup, "DB_PORT", 5432u16)?,
                &text("DB_USER", "postgres"),
                &text("DB_PASSWORD", ""),
                &text("DB_DATABASE", "a11n"),
            ),
        };

        let pool_min_size = parsed(&lookup, "DB_POOL_MIN_SIZE", 1u32)?;
        let pool_max_size = parsed(&lookup, "DB_POOL_MAX_SIZE", 10u32)?;
        anyhow::ensure!(
            pool_min_size <= pool_max_size,
            "DB_POOL_MIN_SIZE ({pool_min_size}) exceeds DB_POOL_MAX_SIZE ({pool_max_size})"
        );

        let cursor_batch_size = parsed(&lookup, "A11N_CURSOR_BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        anyhow::ensure!(cursor_batch_size > 0, "A11N_CURSOR_BATCH_SIZE must be positive");

        let token_ttl_secs = parsed(&lookup, "A11N_TOKEN_TTL_SECS", a11n_auth::DEFAULT_TOKEN_TTL_SECS)?;
        anyhow::ensure!(token_ttl_secs > 0, "A11N_TOKEN_TTL_SECS must be positive");

        Ok(Self {
            database_url,
            pool_min_size,
            pool_max_size,
            acquire_timeout: StdDuration::from_secs(parsed(&lookup, "DB_ACQUIRE_TIMEOUT_SECS", 5u64)?),
            cursor_batch_size,
            token_ttl: chrono::Duration::seconds(token_ttl_secs),
        })
    }

    /// Open a connection pool with the configured bounds.
    pub async fn connect(&self) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .min_connections(self.pool_min_size)
            .max_connections(self.pool_max_size)
            .acquire_timeout(self.acquire_timeout)
            .connect(&self.database_url)
            .await
            .context("failed to connect to Postgres")?;

        info!(
            min = self.pool_min_size,
            max = self.pool_max_size,
            "postgres pool ready"
        );
        Ok(pool)
    }
}
