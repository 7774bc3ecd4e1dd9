pub mod vatsim;

use crate::error::{ConfigError, InitializationError};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use tracing_subscriber::EnvFilter;

pub const SNAPSHOT_QUEUE_NAME: &str = "snapshot_queue";
pub const ENV_VAR_PREFIX: &str = "VATSIM_SESSIONS__";
pub const SETTINGS_FILE: &str = "Settings.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

/// Pool connections held outside the worker lanes: the queue drain and its listener.
pub const RESERVED_CONNECTIONS: usize = 2;

impl Config {
    /// Worker lanes that cannot get a pool connection while every lane is busy.
    pub fn starved_workers(&self) -> usize {
        let available = usize::try_from(self.postgres.max_connections)
            .unwrap_or(usize::MAX)
            .saturating_sub(RESERVED_CONNECTIONS);
        self.reconciler.workers.saturating_sub(available)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Knobs for the reconcile retry policy and the batch worker pool.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Upper bound for one unit of work against the session store.
    pub store_timeout_ms: u64,
    /// Total attempts per record when the store is unavailable or times out.
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Number of per-key lanes reconciled concurrently. Each lane holds one pool connection
    /// while its unit of work is open, and the queue drain and its listener hold two more, so
    /// keep this at most `postgres.max_connections - 2`.
    pub workers: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 5_000,
            max_attempts: 3,
            retry_backoff_ms: 250,
            workers: 8,
        }
    }
}

impl ReconcilerConfig {
    pub const fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HealthConfig {
    pub bind_address: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Room for the default eight workers plus the queue drain and its listener.
const fn default_max_connections() -> u32 {
    10
}

pub fn config_figment() -> Figment {
    Figment::new()
        .merge(Toml::file(SETTINGS_FILE))
        .merge(Env::prefixed(ENV_VAR_PREFIX).split("__"))
}

pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(config_figment())
}

pub fn load_config_from(figment: Figment) -> Result<Config, ConfigError> {
    Ok(figment.extract::<Config>()?)
}

pub mod error {
    use thiserror::Error;
    use tracing::dispatcher::SetGlobalDefaultError;

    #[derive(Debug, Error)]
    pub enum ConfigError {
        #[error("failed to load configuration: {0}")]
        Figment(#[from] figment::Error),
    }

    #[derive(Debug, Error)]
    pub enum InitializationError {
        #[error(transparent)]
        Tracing(#[from] SetGlobalDefaultError),
        #[error(transparent)]
        Config(#[from] ConfigError),
        #[error(transparent)]
        Db(#[from] sqlx::Error),
    }
}

/// Installs the global `tracing` subscriber. `RUST_LOG` drives the filter and falls back to
/// `info` when unset.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), InitializationError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_file(true)
            .with_line_number(true)
            .with_env_filter(env_filter)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = tracing_subscriber::fmt()
            .compact()
            .with_file(true)
            .with_line_number(true)
            .with_env_filter(env_filter)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

#[instrument(skip_all)]
pub async fn initialize_db(
    pg_config: &PostgresConfig,
) -> Result<Pool<Postgres>, InitializationError> {
    let pool = PgPoolOptions::new()
        .max_connections(pg_config.max_connections)
        .connect(&pg_config.connection_string)
        .await?;

    info!(name: "db.connected", "db pool created and connected");

    Ok(pool)
}

pub async fn shutdown_listener(token: Option<CancellationToken>) {
    let ctrl_c = signal::ctrl_c();
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(name: "signal.ctrlc.received", "received Ctrl+C signal, shutting down"),
        _ = terminate => info!(name: "signal.sigterm.received", "received SIGTERM signal, shutting down"),
    }

    if let Some(token) = token {
        token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_fill_missing_sections() {
        let figment = Figment::new().merge(Toml::string(
            r#"
            [postgres]
            connection_string = "postgres://localhost/vatsim"
            "#,
        ));
        let config = load_config_from(figment).unwrap();

        assert_eq!(config.postgres.max_connections, 10);
        assert_eq!(config.starved_workers(), 0);
        assert_eq!(config.reconciler.max_attempts, 3);
        assert_eq!(config.reconciler.store_timeout(), Duration::from_secs(5));
        assert_eq!(config.health.bind_address, "127.0.0.1:3000");
        assert!(!config.logging.json);
    }

    #[test]
    fn config_overrides_reconciler_settings() {
        let figment = Figment::new().merge(Toml::string(
            r#"
            [postgres]
            connection_string = "postgres://localhost/vatsim"

            [reconciler]
            workers = 2
            retry_backoff_ms = 10
            "#,
        ));
        let config = load_config_from(figment).unwrap();

        assert_eq!(config.reconciler.workers, 2);
        assert_eq!(config.reconciler.retry_backoff(), Duration::from_millis(10));
        assert_eq!(config.reconciler.max_attempts, 3);
    }

    #[test]
    fn config_reports_workers_beyond_pool_size() {
        let figment = Figment::new().merge(Toml::string(
            r#"
            [postgres]
            connection_string = "postgres://localhost/vatsim"
            max_connections = 5

            [reconciler]
            workers = 8
            "#,
        ));
        let config = load_config_from(figment).unwrap();

        assert_eq!(config.starved_workers(), 5);
    }

    #[test]
    fn config_requires_connection_string() {
        let figment = Figment::new().merge(Toml::string("[postgres]\n"));
        assert!(load_config_from(figment).is_err());
    }
}
