//! Connection factory: descriptors in, live connections out

use crate::DriverRegistry;
use quay_core::{
    Connection, ConnectionAttributes, ConnectionConfig, ConnectionType, DEFAULT_CONNECTION_NAME,
    DatabaseDriver, QuayError, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for a connection probe when no other timeout is configured
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Live connections keyed by name plus their sanitized descriptors.
///
/// Descriptor order follows the order connections were inserted.
#[derive(Clone, Default)]
pub struct ConnectionSet {
    connections: HashMap<String, Arc<dyn Connection>>,
    descriptors: Vec<ConnectionConfig>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Connection>> {
        self.connections.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    pub fn descriptor(&self, name: &str) -> Option<&ConnectionConfig> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn descriptors(&self) -> &[ConnectionConfig] {
        &self.descriptors
    }

    pub fn names(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Insert or replace a connection. Returns the replaced live connection,
    /// which the caller is responsible for closing.
    pub fn insert(
        &mut self,
        connection: Arc<dyn Connection>,
        descriptor: ConnectionConfig,
    ) -> Option<Arc<dyn Connection>> {
        let name = descriptor.name.clone();
        match self.descriptors.iter_mut().find(|d| d.name == name) {
            Some(existing) => *existing = descriptor,
            None => self.descriptors.push(descriptor),
        }
        self.connections.insert(name, connection)
    }

    pub fn remove(&mut self, name: &str) -> Option<(Arc<dyn Connection>, ConnectionConfig)> {
        let connection = self.connections.remove(name)?;
        let index = self.descriptors.iter().position(|d| d.name == name)?;
        Some((connection, self.descriptors.remove(index)))
    }

    /// Layer `self` over `inherited`: entries of `self` win on a name collision
    pub fn layered_over(&self, inherited: &ConnectionSet) -> ConnectionSet {
        let mut merged = ConnectionSet::new();
        for descriptor in &inherited.descriptors {
            if self.contains(&descriptor.name) {
                continue;
            }
            if let Some(conn) = inherited.get(&descriptor.name) {
                merged.insert(conn, descriptor.clone());
            }
        }
        for descriptor in &self.descriptors {
            if let Some(conn) = self.get(&descriptor.name) {
                merged.insert(conn, descriptor.clone());
            }
        }
        merged
    }

    /// Close every connection in the set. Close failures are logged.
    pub async fn close_all(&self) {
        for (name, connection) in &self.connections {
            if let Err(e) = connection.close().await {
                tracing::warn!(connection = %name, error = %e, "failed to close connection");
            }
        }
    }
}

impl std::fmt::Debug for ConnectionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSet")
            .field("names", &self.names())
            .finish()
    }
}

/// Outcome of a connection probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionTestStatus {
    Ok,
    Failed,
}

/// Result of `test_connection_config`; never an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub status: ConnectionTestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ConnectionStatus {
    pub fn ok() -> Self {
        Self {
            status: ConnectionTestStatus::Ok,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ConnectionTestStatus::Failed,
            error_message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ConnectionTestStatus::Ok
    }
}

/// Builds live connections from descriptors using a driver registry
#[derive(Clone)]
pub struct ConnectionFactory {
    registry: Arc<DriverRegistry>,
    probe_timeout: Duration,
}

impl ConnectionFactory {
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self {
            registry,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Reject duplicate names and the reserved default connection name
    pub fn validate_names(configs: &[ConnectionConfig]) -> Result<()> {
        let mut seen = HashSet::new();
        for config in configs {
            if config.name == DEFAULT_CONNECTION_NAME {
                return Err(QuayError::Configuration(format!(
                    "connection name \"{}\" is reserved for the default embedded connection",
                    DEFAULT_CONNECTION_NAME
                )));
            }
            if !seen.insert(config.name.as_str()) {
                return Err(QuayError::Configuration(format!(
                    "duplicate connection name \"{}\"",
                    config.name
                )));
            }
        }
        Ok(())
    }

    /// Construct every configured connection. If any construction fails the
    /// connections already built are closed and the error is returned.
    #[tracing::instrument(skip(self, configs), fields(count = configs.len(), working_directory = %working_directory.display()))]
    pub async fn create_connections(
        &self,
        configs: &[ConnectionConfig],
        working_directory: &Path,
    ) -> Result<ConnectionSet> {
        Self::validate_names(configs)?;
        for config in configs {
            config.validate()?;
        }

        let mut set = ConnectionSet::new();
        for config in configs {
            match self.create_connection(config, working_directory).await {
                Ok((connection, descriptor)) => {
                    set.insert(connection, descriptor);
                }
                Err(e) => {
                    tracing::error!(connection = %config.name, error = %e, "failed to create connection");
                    set.close_all().await;
                    return Err(e);
                }
            }
        }
        Ok(set)
    }

    /// Construct one connection and its sanitized descriptor
    pub async fn create_connection(
        &self,
        config: &ConnectionConfig,
        working_directory: &Path,
    ) -> Result<(Arc<dyn Connection>, ConnectionConfig)> {
        config.validate()?;
        let driver = self.driver_for(config.connection_type)?;
        let connection = driver.connect(config, working_directory).await?;
        let attributes = probe_attributes(connection.as_ref());
        tracing::info!(
            connection = %config.name,
            connection_type = %config.connection_type,
            dialect = %attributes.dialect_name,
            "connection created"
        );
        Ok((connection, config.sanitized(attributes)))
    }

    /// Construct the embedded analytical connection every package owns
    pub async fn create_default_connection(
        &self,
        working_directory: &Path,
    ) -> Result<(Arc<dyn Connection>, ConnectionConfig)> {
        self.create_connection(&ConnectionConfig::default_duckdb(), working_directory)
            .await
    }

    /// Build a throwaway connection and run its `test()`, bounded by the
    /// probe timeout. Failures are reported in the returned status.
    #[tracing::instrument(skip(self, config), fields(connection = %config.name, connection_type = %config.connection_type))]
    pub async fn test_connection_config(
        &self,
        config: &ConnectionConfig,
        working_directory: &Path,
    ) -> ConnectionStatus {
        let probe = async {
            config.validate()?;
            let driver = self.driver_for(config.connection_type)?;
            driver.test_connection(config, working_directory).await
        };

        match tokio::time::timeout(self.probe_timeout, probe).await {
            Ok(Ok(())) => {
                tracing::debug!("connection test succeeded");
                ConnectionStatus::ok()
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "connection test failed");
                ConnectionStatus::failed(e.to_string())
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.probe_timeout.as_millis() as u64, "connection test timed out");
                ConnectionStatus::failed(
                    QuayError::Timeout(format!(
                        "connection test did not finish within {} ms",
                        self.probe_timeout.as_millis()
                    ))
                    .to_string(),
                )
            }
        }
    }

    fn driver_for(&self, connection_type: ConnectionType) -> Result<Arc<dyn DatabaseDriver>> {
        self.registry.get(connection_type).ok_or_else(|| {
            QuayError::Configuration(format!(
                "no driver registered for connection type {}",
                connection_type
            ))
        })
    }
}

impl std::fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("registry", &self.registry)
            .field("probe_timeout", &self.probe_timeout)
            .finish()
    }
}

fn probe_attributes(connection: &dyn Connection) -> ConnectionAttributes {
    let probe = |capability: &str, outcome: Result<bool>| {
        outcome.unwrap_or_else(|e| {
            tracing::warn!(
                connection = %connection.name(),
                capability,
                error = %e,
                "capability probe failed, assuming unsupported"
            );
            false
        })
    };

    ConnectionAttributes {
        dialect_name: connection.dialect_name().to_string(),
        is_pool: probe("is_pool", connection.is_pool()),
        can_persist: probe("can_persist", connection.can_persist()),
        can_stream: probe("can_stream", connection.can_stream()),
    }
}
