//! Connection ownership with liveness checks and bounded reconnects.
//!
//! A failed `SELECT 1` before an operation triggers a reconnect. Reconnects
//! back off exponentially until `max_wait` is spent; after that the session
//! is degraded and each operation gets a single fast attempt until one
//! succeeds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{Result, StoreError};
use crate::storage::schema;

/// Exponential backoff schedule bounded by a total wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub max_wait: Duration,
}

impl Backoff {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            initial: config.initial_backoff,
            max: config.max_backoff,
            max_wait: config.max_wait,
        }
    }

    /// Sleeps between attempts. The total never exceeds `max_wait`.
    pub fn delays(&self) -> Vec<Duration> {
        let mut delays = Vec::new();
        let mut total = Duration::ZERO;
        let mut next = self.initial.min(self.max);
        while total < self.max_wait && !next.is_zero() {
            let step = next.min(self.max_wait - total);
            delays.push(step);
            total += step;
            next = (next * 2).min(self.max);
        }
        delays
    }
}

pub struct Session {
    options: PgConnectOptions,
    target: String,
    max_connections: u32,
    connect_timeout: Duration,
    backoff: Backoff,
    create_extension: bool,
    pool: RwLock<Option<PgPool>>,
    degraded: AtomicBool,
    gate: Mutex<()>,
}

impl Session {
    /// Parse the connection settings. Does not connect.
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        let url = config.url.as_deref().ok_or_else(|| {
            StoreError::Config(
                "no connection string: set connection.url, HYSTORE_URL or PG_CONN_STR".to_string(),
            )
        })?;
        let options: PgConnectOptions = url
            .parse()
            .map_err(|_| StoreError::Config("connection string is not a valid postgres URL".to_string()))?;
        let target = describe_target(&options);

        Ok(Self {
            options,
            target,
            max_connections: config.max_connections,
            connect_timeout: config.connect_timeout,
            backoff: Backoff::from_config(config),
            create_extension: config.create_extension,
            pool: RwLock::new(None),
            degraded: AtomicBool::new(false),
            gate: Mutex::new(()),
        })
    }

    /// `host:port/database`; never includes credentials.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// A live pool, reconnecting first if the liveness check fails.
    pub async fn pool(&self) -> Result<PgPool> {
        if let Some(pool) = self.live_pool().await {
            return Ok(pool);
        }

        let _gate = self.gate.lock().await;
        // Another caller may have reconnected while we waited.
        if let Some(pool) = self.live_pool().await {
            return Ok(pool);
        }

        let stale = self.pool.write().take();
        if let Some(stale) = stale {
            stale.close().await;
        }

        let pool = self.reconnect().await?;
        *self.pool.write() = Some(pool.clone());
        Ok(pool)
    }

    pub async fn close(&self) {
        let pool = self.pool.write().take();
        if let Some(pool) = pool {
            pool.close().await;
        }
    }

    async fn live_pool(&self) -> Option<PgPool> {
        let pool = self.pool.read().clone()?;
        match sqlx::query("SELECT 1").execute(&pool).await {
            Ok(_) => Some(pool),
            Err(err) => {
                debug!(server = %self.target, error = %err, "liveness check failed");
                None
            }
        }
    }

    async fn reconnect(&self) -> Result<PgPool> {
        if self.is_degraded() {
            return match self.connect_once().await {
                Ok(pool) => Ok(pool),
                Err(ConnectFailure::Fatal(err)) => Err(err),
                Err(ConnectFailure::Transient(err)) => Err(StoreError::Connection(format!(
                    "{} unreachable (degraded): {err}",
                    self.target
                ))),
            };
        }

        let mut last_error = match self.connect_once().await {
            Ok(pool) => return Ok(pool),
            Err(ConnectFailure::Fatal(err)) => return Err(err),
            Err(ConnectFailure::Transient(err)) => err,
        };

        for delay in self.backoff.delays() {
            warn!(
                server = %self.target,
                error = %last_error,
                retry_in_ms = delay.as_millis() as u64,
                "connection attempt failed"
            );
            tokio::time::sleep(delay).await;
            match self.connect_once().await {
                Ok(pool) => return Ok(pool),
                Err(ConnectFailure::Fatal(err)) => return Err(err),
                Err(ConnectFailure::Transient(err)) => last_error = err,
            }
        }

        self.degraded.store(true, Ordering::Release);
        warn!(
            server = %self.target,
            max_wait_secs = self.backoff.max_wait.as_secs(),
            "retry budget exhausted; entering degraded mode"
        );
        Err(StoreError::Connection(format!(
            "{} unreachable after {:?}: {last_error}",
            self.target, self.backoff.max_wait
        )))
    }

    async fn connect_once(&self) -> std::result::Result<PgPool, ConnectFailure> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.connect_timeout)
            .connect_with(self.options.clone())
            .await
            .map_err(|err| ConnectFailure::Transient(err.to_string()))?;

        if let Err(err) = schema::ensure_extensions(&pool, self.create_extension).await {
            pool.close().await;
            return Err(ConnectFailure::Fatal(err));
        }

        if self.degraded.swap(false, Ordering::AcqRel) {
            info!(server = %self.target, "connection restored; leaving degraded mode");
        } else {
            info!(server = %self.target, "connected");
        }
        Ok(pool)
    }
}

enum ConnectFailure {
    Transient(String),
    Fatal(StoreError),
}

fn describe_target(options: &PgConnectOptions) -> String {
    let database = options.get_database().unwrap_or("postgres");
    format!("{}:{}/{database}", options.get_host(), options.get_port())
}
