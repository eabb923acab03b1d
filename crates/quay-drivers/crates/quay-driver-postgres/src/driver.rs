//! PostgreSQL driver implementation

use crate::connection::PostgresConnection;
use async_trait::async_trait;
use quay_core::{
    Connection, ConnectionConfig, ConnectionType, DatabaseDriver, DriverCapabilities, QuayError,
    Result,
};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Default connect timeout when the descriptor does not set one
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// PostgreSQL database driver
pub struct PostgresDriver;

impl PostgresDriver {
    /// Create a new PostgreSQL driver instance
    pub fn new() -> Self {
        tracing::debug!("PostgreSQL driver initialized");
        Self
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the client configuration from a descriptor.
///
/// A connection string wins over the individual fields.
pub fn client_config(config: &ConnectionConfig) -> Result<tokio_postgres::Config> {
    let pg = config.postgres_connection.as_ref().ok_or_else(|| {
        QuayError::Configuration(format!(
            "postgres connection \"{}\" is missing required field postgresConnection",
            config.name
        ))
    })?;

    let mut client_config = match pg.connection_string.as_deref().filter(|s| !s.is_empty()) {
        Some(connection_string) => tokio_postgres::Config::from_str(connection_string)
            .map_err(|e| {
                QuayError::Configuration(format!(
                    "invalid connection string for \"{}\": {}",
                    config.name, e
                ))
            })?,
        None => {
            let mut client_config = tokio_postgres::Config::new();
            client_config
                .host(pg.host.as_deref().unwrap_or("localhost"))
                .port(pg.port.unwrap_or(5432))
                .dbname(pg.database_name.as_deref().unwrap_or("postgres"));
            if let Some(user) = &pg.user_name {
                client_config.user(user);
            }
            if let Some(password) = &pg.password {
                client_config.password(password);
            }
            client_config
        }
    };

    if client_config.get_connect_timeout().is_none() {
        client_config.connect_timeout(DEFAULT_CONNECT_TIMEOUT);
    }
    client_config.application_name("quay");
    Ok(client_config)
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    fn connection_types(&self) -> &'static [ConnectionType] {
        &[ConnectionType::Postgres]
    }

    fn display_name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            supports_pooling: false,
            supports_persistence: true,
            supports_streaming: true,
            supports_attachments: false,
        }
    }

    #[tracing::instrument(skip(self, config, _working_directory), fields(connection = %config.name))]
    async fn connect(
        &self,
        config: &ConnectionConfig,
        _working_directory: &Path,
    ) -> Result<Arc<dyn Connection>> {
        let client_config = client_config(config)?;
        let conn = PostgresConnection::connect(config.name.clone(), client_config)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to connect to PostgreSQL database");
                e
            })?;
        Ok(Arc::new(conn))
    }
}
