//! PostgreSQL implementation of the primary sink.
//!
//! Every insert opens its own connection, checks it with `SELECT 1`, runs one
//! parameterized statement and drops the connection. No pool is kept.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, trace};

use super::error::{SinkError, SinkStage};
use super::EventSink;
use crate::config::AppConfig;
use crate::types::{HostName, TransitionSignal};

/// Upper bound on establishing a connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the ping and on the insert.
pub const STATEMENT_TIMEOUT: Duration = Duration::from_secs(15);

const INSERT_EVENT: &str = "INSERT INTO public.events (at, host, evt) VALUES ($1, $2, $3)";

/// Connection-per-write PostgreSQL sink.
#[derive(Clone)]
pub struct PostgresSink {
    config: tokio_postgres::Config,
}

impl PostgresSink {
    /// Builds a sink from the datastore fields of the configuration. TLS is
    /// not negotiated.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .user(&config.user)
            .dbname(&config.database)
            .application_name("uptime-recorder")
            .connect_timeout(CONNECT_TIMEOUT);
        if !config.password.is_empty() {
            pg.password(&config.password);
        }
        PostgresSink { config: pg }
    }

    /// Opens a connection and checks that it answers.
    pub async fn ping(&self) -> Result<(), SinkError> {
        let client = self.connect().await?;
        Self::check_alive(&client).await
    }

    async fn connect(&self) -> Result<Client, SinkError> {
        let (client, connection) =
            tokio::time::timeout(CONNECT_TIMEOUT, self.config.connect(NoTls))
                .await
                .map_err(|_| SinkError::timed_out(SinkStage::Connect, CONNECT_TIMEOUT))?
                .map_err(|e| SinkError::from_driver(SinkStage::Connect, e))?;

        // The connection future drives the socket; it ends once the client drops.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "Datastore connection closed with error");
            }
        });

        Ok(client)
    }

    async fn check_alive(client: &Client) -> Result<(), SinkError> {
        tokio::time::timeout(STATEMENT_TIMEOUT, client.simple_query("SELECT 1"))
            .await
            .map_err(|_| SinkError::timed_out(SinkStage::Ping, STATEMENT_TIMEOUT))?
            .map_err(|e| SinkError::from_driver(SinkStage::Ping, e))?;
        Ok(())
    }
}

impl std::fmt::Debug for PostgresSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSink")
            .field("host", &self.config.get_hosts())
            .field("dbname", &self.config.get_dbname())
            .finish_non_exhaustive()
    }
}

impl EventSink for PostgresSink {
    async fn insert(
        &self,
        at: DateTime<Utc>,
        host: &HostName,
        kind: TransitionSignal,
    ) -> Result<(), SinkError> {
        let client = self.connect().await?;
        Self::check_alive(&client).await?;

        let rows = tokio::time::timeout(
            STATEMENT_TIMEOUT,
            client.execute(INSERT_EVENT, &[&at, &host.as_str(), &kind.as_str()]),
        )
        .await
        .map_err(|_| SinkError::timed_out(SinkStage::Insert, STATEMENT_TIMEOUT))?
        .map_err(|e| SinkError::from_driver(SinkStage::Insert, e))?;

        trace!(rows, %host, %kind, "Inserted event row");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig {
            host: "db.internal".to_string(),
            port: 6543,
            user: "uptime".to_string(),
            password: "hunter2".to_string(),
            database: "monitoring".to_string(),
            hostname: "desk-01".to_string(),
        }
    }

    #[test]
    fn from_config_maps_connection_fields() {
        let sink = PostgresSink::from_config(&config());
        assert_eq!(sink.config.get_ports(), &[6543]);
        assert_eq!(sink.config.get_user(), Some("uptime"));
        assert_eq!(sink.config.get_dbname(), Some("monitoring"));
        assert_eq!(sink.config.get_password(), Some(b"hunter2".as_slice()));
        assert_eq!(sink.config.get_connect_timeout(), Some(&CONNECT_TIMEOUT));
    }

    #[test]
    fn empty_password_is_not_sent() {
        let mut cfg = config();
        cfg.password.clear();
        let sink = PostgresSink::from_config(&cfg);
        assert_eq!(sink.config.get_password(), None);
    }

    #[test]
    fn debug_omits_credentials() {
        let debug = format!("{:?}", PostgresSink::from_config(&config()));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("monitoring"));
    }

    #[tokio::test]
    async fn unreachable_datastore_fails_at_connect() {
        // Port 1 on localhost is not a PostgreSQL server.
        let mut cfg = config();
        cfg.host = "127.0.0.1".to_string();
        cfg.port = 1;
        let sink = PostgresSink::from_config(&cfg);

        let err = sink
            .insert(Utc::now(), &HostName::new("h"), TransitionSignal::On)
            .await
            .unwrap_err();
        assert_eq!(err.stage, SinkStage::Connect);
    }
}
