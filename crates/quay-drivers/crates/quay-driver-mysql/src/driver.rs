//! MySQL driver implementation

use crate::connection::MySqlConnection;
use async_trait::async_trait;
use mysql_async::{Opts, OptsBuilder, PoolConstraints, PoolOpts};
use quay_core::{
    Connection, ConnectionConfig, ConnectionType, DatabaseDriver, DriverCapabilities, QuayError,
    Result,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// How long a checkout from the pool may wait for a session
pub const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on pooled sessions per connection
pub const MAX_POOL_SIZE: usize = 10;

/// MySQL database driver
pub struct MySqlDriver;

impl MySqlDriver {
    /// Create a new MySQL driver instance
    pub fn new() -> Self {
        tracing::debug!("MySQL driver initialized");
        Self
    }
}

impl Default for MySqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Build pool options from a descriptor
pub fn pool_opts(config: &ConnectionConfig) -> Result<Opts> {
    let mysql = config.mysql_connection.as_ref().ok_or_else(|| {
        QuayError::Configuration(format!(
            "mysql connection \"{}\" is missing required field mysqlConnection",
            config.name
        ))
    })?;

    let constraints = PoolConstraints::new(0, MAX_POOL_SIZE).ok_or_else(|| {
        QuayError::Configuration(format!(
            "Failed to configure MySQL pool constraints (min=0, max={})",
            MAX_POOL_SIZE
        ))
    })?;

    let builder = OptsBuilder::default()
        .ip_or_hostname(mysql.host.clone().unwrap_or_else(|| "localhost".to_string()))
        .tcp_port(mysql.port.unwrap_or(3306))
        .db_name(mysql.database.clone())
        .user(mysql.user.clone())
        .pass(mysql.password.clone())
        .pool_opts(PoolOpts::default().with_constraints(constraints));
    Ok(builder.into())
}

#[async_trait]
impl DatabaseDriver for MySqlDriver {
    fn connection_types(&self) -> &'static [ConnectionType] {
        &[ConnectionType::Mysql]
    }

    fn display_name(&self) -> &'static str {
        "MySQL"
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            supports_pooling: true,
            supports_persistence: true,
            supports_streaming: false,
            supports_attachments: false,
        }
    }

    #[tracing::instrument(skip(self, config, _working_directory), fields(connection = %config.name))]
    async fn connect(
        &self,
        config: &ConnectionConfig,
        _working_directory: &Path,
    ) -> Result<Arc<dyn Connection>> {
        let opts = pool_opts(config)?;
        let conn = MySqlConnection::connect(config.name.clone(), opts, DEFAULT_CHECKOUT_TIMEOUT)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to connect to MySQL database");
                e
            })?;
        Ok(Arc::new(conn))
    }
}
