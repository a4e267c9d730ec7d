//! PostgreSQL sink backed by a single `tokio-postgres` connection.
//!
//! The connection is validated lazily: before each write the handle checks
//! whether the client is closed and, if so, reconnects in place. Reconnecting
//! blocks the current message and only gives up when shutdown is requested.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::sleep;
use tokio_postgres::{Client, NoTls};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::Sink;
use crate::config::Config;
use crate::error::PersistError;
use crate::models::Reading;

/// Insert statement for one reading.
///
/// Expects `weather_logs(id SERIAL PRIMARY KEY, estacion_id SMALLINT,
/// temperatura DOUBLE PRECISION, humedad DOUBLE PRECISION,
/// presion DOUBLE PRECISION NULL, fecha TIMESTAMP,
/// inserted_at TIMESTAMP DEFAULT now())`, created outside this service.
pub const INSERT_READING: &str = "INSERT INTO weather_logs \
     (estacion_id, temperatura, humedad, presion, fecha) \
     VALUES ($1, $2, $3, $4, $5)";

const PROBE_QUERY: &str = "SELECT 1";

/// Connection parameters, kept separately so the password never reaches logs.
#[derive(Clone)]
struct Target {
    pg: tokio_postgres::Config,
    host: String,
    port: u16,
    db: String,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.db)
    }
}

/// A self-healing handle to one PostgreSQL connection.
pub struct PgHandle {
    target: Target,
    reconnect_delay: Duration,
    client: Mutex<Client>,
    shutdown: CancellationToken,
}

impl PgHandle {
    /// Connect to the store, retrying every `db_reconnect_delay` until it
    /// answers.
    ///
    /// Returns `None` if `shutdown` is cancelled first.
    pub async fn connect(config: &Config, shutdown: CancellationToken) -> Option<Self> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.postgres_host)
            .port(config.postgres_port)
            .dbname(&config.postgres_db)
            .user(&config.postgres_user)
            .password(&config.postgres_password)
            .connect_timeout(config.db_connect_timeout);

        let target = Target {
            pg,
            host: config.postgres_host.clone(),
            port: config.postgres_port,
            db: config.postgres_db.clone(),
        };

        let client = open_until_ready(&target, config.db_reconnect_delay, &shutdown).await?;
        Some(Self {
            target,
            reconnect_delay: config.db_reconnect_delay,
            client: Mutex::new(client),
            shutdown,
        })
    }

    /// Cheap liveness check: whether the client's connection task is still running.
    pub async fn is_alive(&self) -> bool {
        !self.client.lock().await.is_closed()
    }

    /// Round-trip check with `SELECT 1`.
    pub async fn probe(&self) -> bool {
        let client = self.client.lock().await;
        probe(&client).await
    }

    /// Replace the client with a fresh connection. Blocks until one succeeds.
    ///
    /// Returns `false`, keeping the old client, if shutdown is requested first.
    #[instrument(skip(self), fields(target = %self.target))]
    pub async fn reconnect(&self) -> bool {
        let mut client = self.client.lock().await;
        match open_until_ready(&self.target, self.reconnect_delay, &self.shutdown).await {
            Some(fresh) => {
                *client = fresh;
                true
            }
            None => false,
        }
    }

    /// Lock the client, reconnecting first if it is closed.
    async fn live_client(&self) -> Result<MutexGuard<'_, Client>, PersistError> {
        if !self.is_alive().await {
            warn!(target = %self.target, "Store connection is closed, reconnecting");
            if !self.reconnect().await {
                return Err(PersistError::Unavailable(
                    "shutdown requested while reconnecting".to_string(),
                ));
            }
        }
        Ok(self.client.lock().await)
    }

    /// Restore the connection after a failed persist.
    ///
    /// A connection whose last call was abandoned mid-flight is replaced
    /// outright; otherwise it is probed and replaced only if it does not answer.
    async fn repair(&self, cause: &PersistError) {
        if cause.abandons_connection() {
            warn!(target = %self.target, class = cause.class(), "Discarding store connection");
        } else if self.is_alive().await && self.probe().await {
            return;
        } else {
            warn!(target = %self.target, "Store connection is stale, reconnecting");
        }
        self.reconnect().await;
    }
}

async fn probe(client: &Client) -> bool {
    match client.simple_query(PROBE_QUERY).await {
        Ok(_) => true,
        Err(e) => {
            debug!(error = %e, "Store probe failed");
            false
        }
    }
}

async fn open(target: &Target) -> Result<Client, tokio_postgres::Error> {
    let (client, connection) = target.pg.connect(NoTls).await?;

    let target_name = target.to_string();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(target = %target_name, error = %e, "Store connection terminated");
        }
    });

    Ok(client)
}

async fn open_until_ready(
    target: &Target,
    delay: Duration,
    shutdown: &CancellationToken,
) -> Option<Client> {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        let opened = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            opened = open(target) => Some(opened),
        };

        match opened {
            None => {
                info!(target = %target, "Shutdown requested, giving up on the store");
                return None;
            }
            Some(Ok(client)) => {
                info!(target = %target, attempt, "Connected to store");
                return Some(client);
            }
            Some(Err(e)) => {
                error!(
                    target = %target,
                    attempt,
                    delay = ?delay,
                    error = %e,
                    "Store connection failed, retrying"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = sleep(delay) => {}
                }
            }
        }
    }
}

/// [`Sink`] that writes each reading in its own transaction.
pub struct PostgresSink {
    handle: PgHandle,
}

impl PostgresSink {
    pub fn new(handle: PgHandle) -> Self {
        Self { handle }
    }

    /// Returns `None` if `shutdown` is cancelled before the store answers.
    pub async fn connect(config: &Config, shutdown: CancellationToken) -> Option<Self> {
        PgHandle::connect(config, shutdown).await.map(Self::new)
    }
}

#[async_trait]
impl Sink for PostgresSink {
    #[instrument(skip(self, reading), fields(station_id = reading.station_id()))]
    async fn persist(&self, reading: &Reading) -> Result<(), PersistError> {
        let mut client = self.handle.live_client().await?;
        let tx = client.transaction().await?;

        let station_id = i16::from(reading.station_id());
        let temperature = reading.temperature();
        let humidity = reading.humidity();
        let pressure = reading.pressure();
        let timestamp = reading.timestamp();

        let inserted = tx
            .execute(
                INSERT_READING,
                &[&station_id, &temperature, &humidity, &pressure, &timestamp],
            )
            .await;

        match inserted {
            Ok(_) => {
                tx.commit().await?;
                debug!("Reading committed");
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    debug!(error = %rollback, "Rollback failed");
                }
                Err(e.into())
            }
        }
    }

    async fn repair(&self, cause: &PersistError) {
        self.handle.repair(cause).await;
    }
}
